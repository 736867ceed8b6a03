use crate::conversation::{ConversationSnapshot, MemberSnapshot, ReceiptMode};
use crate::ids::{ClientId, ConversationId, GroupId, UserId};
use crate::message::RegularMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One entry of the backend's ordered event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub payload: EventPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    NewConversation {
        conversation: ConversationSnapshot,
        timestamp_ms: u64,
    },
    MemberJoin {
        conversation_id: ConversationId,
        from: UserId,
        members: Vec<MemberSnapshot>,
        timestamp_ms: u64,
    },
    MemberLeave {
        conversation_id: ConversationId,
        from: UserId,
        user_ids: Vec<UserId>,
        timestamp_ms: u64,
    },
    ReceiptModeUpdate {
        conversation_id: ConversationId,
        from: UserId,
        receipt_mode: ReceiptMode,
    },
    NewMessage(NewMessageEvent),
    NewGroupMessage(NewGroupMessageEvent),
    GroupWelcome {
        conversation_id: ConversationId,
        group_id: GroupId,
        welcome: Vec<u8>,
    },
}

/// A pairwise-encrypted message event. The ciphertext is base64 because it
/// travels inside a JSON event; a large payload is carried out-of-band in
/// `external_blob`, keyed by instructions inside the envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageEvent {
    pub conversation_id: ConversationId,
    pub sender_user_id: UserId,
    pub sender_client_id: ClientId,
    pub ciphertext: String,
    pub external_blob: Option<Vec<u8>>,
    pub timestamp_ms: u64,
}

/// A group-encrypted message event. Raw ciphertext bytes; the group is
/// resolved from the conversation's stored protocol info, never the event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroupMessageEvent {
    pub conversation_id: ConversationId,
    pub sender_user_id: UserId,
    pub sender_client_id: ClientId,
    pub ciphertext: Vec<u8>,
    pub external_blob: Option<Vec<u8>>,
    pub timestamp_ms: u64,
}

/// Change notifications surfaced to the layer above after events have been
/// applied to storage.
#[derive(Clone, Debug)]
pub enum CoreEvent {
    MessageReceived(RegularMessage),
    ConversationUpserted(ConversationId),
    ReactionsUpdated {
        conversation_id: ConversationId,
        message_id: String,
    },
}

pub type CoreEventReceiver = broadcast::Receiver<CoreEvent>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size);
        Self { tx }
    }

    pub fn subscribe(&self) -> CoreEventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}
