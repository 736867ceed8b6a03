use crate::config::CoreConfig;
use crate::conversation::{ConversationRepository, ReceiptMode};
use crate::error::CoreError;
use crate::ids::ConversationId;
use crate::message::{
    Message, MessageContent, MessageRepository, ReceiptKind, SignalingMessage,
};
use crate::sender::MessageSender;
use crate::sync::SyncRepository;
use crate::time::now_ms;
use tracing::debug;
use uuid::Uuid;

/// Sends read confirmations for the other senders' messages in a
/// conversation, honoring its receipt-mode flag.
#[derive(Clone)]
pub struct SendConfirmation {
    config: CoreConfig,
    conversations: ConversationRepository,
    messages: MessageRepository,
    sender: MessageSender,
}

impl SendConfirmation {
    pub fn new(
        config: CoreConfig,
        conversations: ConversationRepository,
        messages: MessageRepository,
        sender: MessageSender,
    ) -> Self {
        Self {
            config,
            conversations,
            messages,
            sender,
        }
    }

    /// Confirms everything read between the previous read marker and
    /// `until_ms`. A no-op when the conversation has receipts disabled or
    /// there is nothing new to confirm.
    pub async fn confirm_read(
        &self,
        conversation_id: &ConversationId,
        until_ms: u64,
    ) -> Result<(), CoreError> {
        let conversation = self.conversations.require(conversation_id)?;
        if conversation.receipt_mode == ReceiptMode::Disabled {
            debug!(conversation = %conversation_id, "receipts disabled, skipping confirmation");
            return Ok(());
        }
        let after_ms = conversation.last_read_ms;
        let message_ids: Vec<String> = self
            .messages
            .list(conversation_id)?
            .into_iter()
            .filter(|m| m.sender_user_id != self.config.self_user_id)
            .filter(|m| m.timestamp_ms > after_ms && m.timestamp_ms <= until_ms)
            .map(|m| m.id)
            .collect();
        if message_ids.is_empty() {
            return Ok(());
        }
        let signaling = SignalingMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            sender_user_id: self.config.self_user_id.clone(),
            sender_client_id: Some(self.config.self_client_id.clone()),
            timestamp_ms: now_ms(),
            content: MessageContent::Receipt {
                kind: ReceiptKind::Read,
                message_ids,
            },
        };
        self.sender.send_message(Message::Signaling(signaling)).await
    }
}

/// Advances the conversation's read marker.
///
/// Confirmations go out first (they need the previous marker to know what is
/// newly read), then the local marker moves, then the new marker is fanned
/// out to our own other clients through the self conversation.
#[derive(Clone)]
pub struct UpdateConversationReadDate {
    config: CoreConfig,
    conversations: ConversationRepository,
    sender: MessageSender,
    confirmations: SendConfirmation,
    sync: SyncRepository,
}

impl UpdateConversationReadDate {
    pub fn new(
        config: CoreConfig,
        conversations: ConversationRepository,
        sender: MessageSender,
        confirmations: SendConfirmation,
        sync: SyncRepository,
    ) -> Self {
        Self {
            config,
            conversations,
            sender,
            confirmations,
            sync,
        }
    }

    pub async fn update(
        &self,
        conversation_id: &ConversationId,
        time_ms: u64,
    ) -> Result<(), CoreError> {
        self.sync.wait_until_slow_sync_complete().await?;
        self.confirmations.confirm_read(conversation_id, time_ms).await?;
        self.conversations.update_read_date(conversation_id, time_ms)?;
        for self_conversation_id in self.conversations.self_conversation_ids()? {
            self.broadcast_last_read(conversation_id, &self_conversation_id, time_ms)
                .await?;
        }
        Ok(())
    }

    async fn broadcast_last_read(
        &self,
        conversation_id: &ConversationId,
        self_conversation_id: &ConversationId,
        time_ms: u64,
    ) -> Result<(), CoreError> {
        let signaling = SignalingMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: self_conversation_id.clone(),
            sender_user_id: self.config.self_user_id.clone(),
            sender_client_id: Some(self.config.self_client_id.clone()),
            timestamp_ms: now_ms(),
            content: MessageContent::LastRead {
                conversation_id: conversation_id.clone(),
                time_ms,
            },
        };
        self.sender.send_message(Message::Signaling(signaling)).await
    }
}
