use crate::codec::{self, ProtoContent};
use crate::config::CoreConfig;
use crate::conversation::{ConversationRepository, ProtocolInfo};
use crate::crypto::{GroupCryptoProvider, PairwiseCryptoProvider, SessionId};
use crate::error::{CoreError, CryptoFailure};
use crate::ids::ConversationId;
use crate::message::{Message, MessageRepository, MessageStatus};
use crate::network::{NetworkGateway, RecipientEnvelope};
use crate::sync::SyncRepository;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outgoing pipeline: persist pending, encrypt per recipient, transmit,
/// reconcile delivery state.
#[derive(Clone)]
pub struct MessageSender {
    config: CoreConfig,
    conversations: ConversationRepository,
    messages: MessageRepository,
    sync: SyncRepository,
    gateway: Arc<dyn NetworkGateway>,
    pairwise: Arc<dyn PairwiseCryptoProvider>,
    group: Arc<dyn GroupCryptoProvider>,
}

impl MessageSender {
    pub fn new(
        config: CoreConfig,
        conversations: ConversationRepository,
        messages: MessageRepository,
        sync: SyncRepository,
        gateway: Arc<dyn NetworkGateway>,
        pairwise: Arc<dyn PairwiseCryptoProvider>,
        group: Arc<dyn GroupCryptoProvider>,
    ) -> Self {
        Self {
            config,
            conversations,
            messages,
            sync,
            gateway,
            pairwise,
            group,
        }
    }

    /// Sends a message through the pipeline.
    ///
    /// Regular content suspends until incremental sync is live; signaling
    /// (confirmations, reactions, read markers) bypasses that gate so small
    /// control traffic still flows while catching up. Regular messages are
    /// persisted as `Pending` before the first network byte, so nothing is
    /// ever silently dropped.
    pub async fn send_message(&self, message: Message) -> Result<(), CoreError> {
        match message {
            Message::Regular(regular) => {
                self.sync.wait_until_live().await?;
                self.messages.insert(&regular)?;
                self.send_pending_message(&regular.conversation_id, &regular.id)
                    .await
            }
            Message::Signaling(signaling) => {
                let payload = codec::encode_to_protobuf(&ProtoContent::Readable {
                    message_id: signaling.id.clone(),
                    content: signaling.content.clone(),
                    is_self_message: true,
                })?;
                self.transmit(&signaling.conversation_id, &payload).await?;
                Ok(())
            }
        }
    }

    /// Encrypts and transmits an already-persisted message, updating its
    /// status from the outcome. Used for both fresh sends and manual retry
    /// of a failed message.
    pub async fn send_pending_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> Result<(), CoreError> {
        let message = self.messages.require(conversation_id, message_id)?;
        let payload = codec::encode_to_protobuf(&ProtoContent::Readable {
            message_id: message.id.clone(),
            content: message.content.clone(),
            is_self_message: true,
        })?;
        match self.transmit(conversation_id, &payload).await {
            Ok(server_time_ms) => {
                self.messages
                    .update_timestamp(conversation_id, message_id, server_time_ms)?;
                self.messages
                    .update_status(conversation_id, message_id, MessageStatus::Sent)?;
                info!(conversation = %conversation_id, message = %message_id, "message sent");
                Ok(())
            }
            Err(error) if error.is_retriable() => {
                // Transient: the message stays pending and the caller may
                // retry without seeing it as failed.
                warn!(
                    conversation = %conversation_id,
                    message = %message_id,
                    %error,
                    "transient send failure, message left pending"
                );
                Err(error)
            }
            Err(error) => {
                self.messages
                    .update_status(conversation_id, message_id, MessageStatus::Failed)?;
                warn!(
                    conversation = %conversation_id,
                    message = %message_id,
                    %error,
                    "send rejected, message marked failed"
                );
                Err(error)
            }
        }
    }

    async fn transmit(
        &self,
        conversation_id: &ConversationId,
        payload: &[u8],
    ) -> Result<u64, CoreError> {
        let conversation = self.conversations.require(conversation_id)?;
        match &conversation.protocol {
            ProtocolInfo::Proteus | ProtocolInfo::Mixed { .. } => {
                let envelopes = self.encrypt_for_recipients(conversation_id, payload).await?;
                self.gateway
                    .send_pairwise_message(conversation_id, &self.config.self_client_id, envelopes)
                    .await
            }
            ProtocolInfo::Mls { group_id, .. } => {
                // Membership proposals queued by event handlers ride ahead of
                // the message so the ciphertext binds to the new epoch.
                self.group.commit_pending_proposals(group_id).await?;
                let ciphertext = self.group.encrypt_message(group_id, payload).await?;
                self.gateway.send_group_message(group_id, ciphertext).await
            }
        }
    }

    /// One ciphertext per (user, client) pair, skipping our own sending
    /// device. A missing session is established on demand from a fetched
    /// prekey and the encryption retried exactly once.
    async fn encrypt_for_recipients(
        &self,
        conversation_id: &ConversationId,
        payload: &[u8],
    ) -> Result<Vec<RecipientEnvelope>, CoreError> {
        let recipients = self.conversations.recipients(conversation_id)?;
        let mut envelopes = Vec::new();
        for recipient in recipients {
            for client in recipient.clients {
                if recipient.user_id == self.config.self_user_id
                    && client == self.config.self_client_id
                {
                    continue;
                }
                let session = SessionId::new(recipient.user_id.clone(), client.clone());
                let ciphertext = match self.pairwise.encrypt(payload, &session).await {
                    Ok(ciphertext) => ciphertext,
                    Err(CoreError::Crypto(CryptoFailure::SessionNotFound)) => {
                        debug!(session = %session, "establishing missing session");
                        let prekey = self
                            .gateway
                            .fetch_prekey(&recipient.user_id, &client)
                            .await?;
                        self.pairwise.establish_session(&session, &prekey).await?;
                        self.pairwise.encrypt(payload, &session).await?
                    }
                    Err(error) => return Err(error),
                };
                envelopes.push(RecipientEnvelope {
                    user_id: recipient.user_id.clone(),
                    client_id: client,
                    ciphertext,
                });
            }
        }
        Ok(envelopes)
    }
}
