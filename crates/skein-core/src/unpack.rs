use crate::codec::{self, ProtoContent};
use crate::conversation::{ConversationRepository, ProtocolInfo};
use crate::crypto::{GroupCryptoProvider, PairwiseCryptoProvider, SessionId};
use crate::error::CoreError;
use crate::event::{NewGroupMessageEvent, NewMessageEvent};
use crate::ids::{ClientId, ConversationId, UserId};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tracing::debug;

/// Outcome of unpacking one encrypted event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageUnpackResult {
    /// The event carried user-facing or signaling content.
    Application(ApplicationMessage),
    /// The event was a protocol handshake with no content; not an error.
    HandshakeOnly,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationMessage {
    pub conversation_id: ConversationId,
    pub sender_user_id: UserId,
    pub sender_client_id: ClientId,
    pub timestamp_ms: u64,
    pub content: ProtoContent,
}

/// Turns raw encrypted events into domain content.
///
/// The protocol is always taken from the conversation's stored protocol
/// info; an event of the wrong flavor fails before any provider call.
#[derive(Clone)]
pub struct MessageUnpacker {
    conversations: ConversationRepository,
    pairwise: Arc<dyn PairwiseCryptoProvider>,
    group: Arc<dyn GroupCryptoProvider>,
    self_user_id: UserId,
}

impl MessageUnpacker {
    pub fn new(
        conversations: ConversationRepository,
        pairwise: Arc<dyn PairwiseCryptoProvider>,
        group: Arc<dyn GroupCryptoProvider>,
        self_user_id: UserId,
    ) -> Self {
        Self {
            conversations,
            pairwise,
            group,
            self_user_id,
        }
    }

    pub async fn unpack_pairwise_message(
        &self,
        event: &NewMessageEvent,
    ) -> Result<MessageUnpackResult, CoreError> {
        let conversation = self.conversations.require(&event.conversation_id)?;
        match conversation.protocol {
            ProtocolInfo::Proteus | ProtocolInfo::Mixed { .. } => {}
            ProtocolInfo::Mls { .. } => {
                return Err(CoreError::ProtocolMismatch {
                    conversation: event.conversation_id.to_string(),
                    stored: conversation.protocol.name(),
                });
            }
        }
        let ciphertext = STANDARD
            .decode(&event.ciphertext)
            .map_err(|e| CoreError::Unknown(format!("malformed ciphertext encoding: {}", e)))?;
        let session = SessionId::new(event.sender_user_id.clone(), event.sender_client_id.clone());
        let plaintext = self.pairwise.decrypt(&ciphertext, &session).await?;
        let is_self = event.sender_user_id == self.self_user_id;
        let content = self.resolve_content(&plaintext, event.external_blob.as_deref(), is_self)?;
        Ok(MessageUnpackResult::Application(ApplicationMessage {
            conversation_id: event.conversation_id.clone(),
            sender_user_id: event.sender_user_id.clone(),
            sender_client_id: event.sender_client_id.clone(),
            timestamp_ms: event.timestamp_ms,
            content,
        }))
    }

    pub async fn unpack_group_message(
        &self,
        event: &NewGroupMessageEvent,
    ) -> Result<MessageUnpackResult, CoreError> {
        let conversation = self.conversations.require(&event.conversation_id)?;
        let group_id = match &conversation.protocol {
            ProtocolInfo::Mls { group_id, .. } | ProtocolInfo::Mixed { group_id, .. } => {
                group_id.clone()
            }
            ProtocolInfo::Proteus => {
                return Err(CoreError::ProtocolMismatch {
                    conversation: event.conversation_id.to_string(),
                    stored: conversation.protocol.name(),
                });
            }
        };
        let plaintext = match self.group.decrypt_message(&group_id, &event.ciphertext).await? {
            Some(plaintext) => plaintext,
            None => {
                debug!(conversation = %event.conversation_id, "handshake-only group message");
                return Ok(MessageUnpackResult::HandshakeOnly);
            }
        };
        let is_self = event.sender_user_id == self.self_user_id;
        let content = self.resolve_content(&plaintext, event.external_blob.as_deref(), is_self)?;
        Ok(MessageUnpackResult::Application(ApplicationMessage {
            conversation_id: event.conversation_id.clone(),
            sender_user_id: event.sender_user_id.clone(),
            sender_client_id: event.sender_client_id.clone(),
            timestamp_ms: event.timestamp_ms,
            content,
        }))
    }

    /// Decodes a plaintext envelope, chasing external instructions into the
    /// out-of-band blob when present.
    fn resolve_content(
        &self,
        plaintext: &[u8],
        external_blob: Option<&[u8]>,
        is_self_message: bool,
    ) -> Result<ProtoContent, CoreError> {
        match codec::decode_from_protobuf(plaintext, is_self_message)? {
            ProtoContent::ExternalInstructions { otr_key, .. } => {
                let blob = external_blob.ok_or_else(|| {
                    CoreError::Unknown("external instructions without payload".to_string())
                })?;
                codec::decrypt_external(&otr_key, blob, is_self_message)
            }
            readable => Ok(readable),
        }
    }
}
