use crate::error::{CoreError, StorageFailure};
use crate::ids::{ClientId, ConversationId, UserId};
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn progress(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Failed => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditStatus {
    NotEdited,
    Edited { last_edit_ms: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    Delivered,
    Read,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberChangeKind {
    Joined,
    Left,
}

/// Closed set of payloads a message can carry.
///
/// `Unknown` preserves the original envelope bytes so a payload from a newer
/// protocol revision survives a re-encode untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    Text {
        content: String,
    },
    Knock {
        hot_knock: bool,
    },
    Asset {
        name: String,
        mime_type: String,
        size_bytes: u64,
        asset_id: String,
        asset_domain: String,
        asset_token: String,
        otr_key: Vec<u8>,
        sha256: Vec<u8>,
    },
    Reaction {
        message_id: String,
        emoji_set: BTreeSet<String>,
    },
    LastRead {
        conversation_id: ConversationId,
        time_ms: u64,
    },
    Receipt {
        kind: ReceiptKind,
        message_ids: Vec<String>,
    },
    MemberChange {
        kind: MemberChangeKind,
        members: Vec<UserId>,
    },
    ReceiptModeChanged {
        enabled: bool,
    },
    Unknown {
        encoded: Vec<u8>,
    },
}

impl MessageContent {
    /// Control-plane content never shown in history and never persisted.
    pub fn is_signaling(&self) -> bool {
        matches!(
            self,
            MessageContent::Reaction { .. }
                | MessageContent::LastRead { .. }
                | MessageContent::Receipt { .. }
        )
    }
}

/// User-visible message, persisted and rendered in conversation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegularMessage {
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender_user_id: UserId,
    pub sender_client_id: Option<ClientId>,
    pub timestamp_ms: u64,
    pub status: MessageStatus,
    pub edit_status: EditStatus,
    pub content: MessageContent,
}

/// Control-plane message: transmitted but never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender_user_id: UserId,
    pub sender_client_id: Option<ClientId>,
    pub timestamp_ms: u64,
    pub content: MessageContent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Regular(RegularMessage),
    Signaling(SignalingMessage),
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::Regular(m) => &m.id,
            Message::Signaling(m) => &m.id,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Message::Regular(m) => &m.conversation_id,
            Message::Signaling(m) => &m.conversation_id,
        }
    }

    pub fn content(&self) -> &MessageContent {
        match self {
            Message::Regular(m) => &m.content,
            Message::Signaling(m) => &m.content,
        }
    }
}

#[derive(Clone)]
pub struct MessageRepository {
    store: Arc<dyn StateStore>,
}

impl MessageRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Inserts a message; `(conversation_id, id)` is the dedup key, so
    /// re-inserting an existing id is a no-op. Returns whether the message
    /// was newly stored.
    pub fn insert(&self, message: &RegularMessage) -> Result<bool, CoreError> {
        let key = Self::message_key(&message.conversation_id, &message.id);
        if self.store.get(&key)?.is_some() {
            return Ok(false);
        }
        self.write(message)?;
        let mut index = self.index(&message.conversation_id)?;
        index.push(message.id.clone());
        self.write_index(&message.conversation_id, &index)?;
        Ok(true)
    }

    pub fn get(
        &self,
        conversation_id: &ConversationId,
        id: &str,
    ) -> Result<Option<RegularMessage>, CoreError> {
        match self.store.get(&Self::message_key(conversation_id, id))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    pub fn require(
        &self,
        conversation_id: &ConversationId,
        id: &str,
    ) -> Result<RegularMessage, CoreError> {
        self.get(conversation_id, id)?
            .ok_or(StorageFailure::NotFound.into())
    }

    /// All messages of a conversation in insertion order.
    pub fn list(&self, conversation_id: &ConversationId) -> Result<Vec<RegularMessage>, CoreError> {
        let mut out = Vec::new();
        for id in self.index(conversation_id)? {
            if let Some(message) = self.get(conversation_id, &id)? {
                out.push(message);
            }
        }
        Ok(out)
    }

    pub fn update_status(
        &self,
        conversation_id: &ConversationId,
        id: &str,
        status: MessageStatus,
    ) -> Result<(), CoreError> {
        let mut message = self.require(conversation_id, id)?;
        message.status = status;
        self.write(&message)
    }

    /// Moves a message forward along `Sent -> Delivered -> Read`, never
    /// backwards: a late `Delivered` receipt cannot demote `Read`.
    pub fn promote_status(
        &self,
        conversation_id: &ConversationId,
        id: &str,
        status: MessageStatus,
    ) -> Result<(), CoreError> {
        let mut message = self.require(conversation_id, id)?;
        if status.progress() <= message.status.progress() {
            return Ok(());
        }
        message.status = status;
        self.write(&message)
    }

    pub fn update_timestamp(
        &self,
        conversation_id: &ConversationId,
        id: &str,
        timestamp_ms: u64,
    ) -> Result<(), CoreError> {
        let mut message = self.require(conversation_id, id)?;
        message.timestamp_ms = timestamp_ms;
        self.write(&message)
    }

    fn write(&self, message: &RegularMessage) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(message)
            .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
        self.store
            .put(&Self::message_key(&message.conversation_id, &message.id), &bytes)
    }

    fn index(&self, conversation_id: &ConversationId) -> Result<Vec<String>, CoreError> {
        match self.store.get(&Self::index_key(conversation_id))? {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    fn write_index(
        &self,
        conversation_id: &ConversationId,
        index: &[String],
    ) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(index)
            .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
        self.store.put(&Self::index_key(conversation_id), &bytes)
    }

    fn message_key(conversation_id: &ConversationId, id: &str) -> String {
        format!("msg:{}:{}", conversation_id, id)
    }

    fn index_key(conversation_id: &ConversationId) -> String {
        format!("msgindex:{}", conversation_id)
    }
}
