use crate::conversation::ConversationSnapshot;
use crate::crypto::Prekey;
use crate::error::{CoreError, NetworkFailure};
use crate::event::Event;
use crate::ids::{ClientId, ConversationId, GroupId, UserId};
use crate::time::now_ms;
use crate::users::{Connection, UserProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub paging_state: Option<String>,
    pub has_more: bool,
}

/// Result of draining the backend's stored event log. `lost_history` is set
/// when the backend no longer holds the event following our checkpoint,
/// meaning events were missed and the local replica can't be trusted.
#[derive(Clone, Debug, Default)]
pub struct EventBatch {
    pub events: Vec<Event>,
    pub lost_history: bool,
}

/// One pairwise ciphertext addressed to a single device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientEnvelope {
    pub user_id: UserId,
    pub client_id: ClientId,
    pub ciphertext: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegalHoldStatus {
    Enabled,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub file_sharing_enabled: bool,
    pub read_receipts_default: bool,
}

/// REST and event-stream access to the backend. The only component allowed
/// to perform I/O; everything above it sees typed results.
#[async_trait]
pub trait NetworkGateway: Send + Sync {
    async fn fetch_self_user(&self) -> Result<UserProfile, CoreError>;
    async fn fetch_users(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, CoreError>;
    async fn fetch_connection_page(
        &self,
        paging_state: Option<String>,
    ) -> Result<Page<Connection>, CoreError>;
    async fn fetch_conversation_page(
        &self,
        paging_state: Option<String>,
    ) -> Result<Page<ConversationSnapshot>, CoreError>;
    async fn fetch_user_clients(
        &self,
        users: &[UserId],
    ) -> Result<Vec<(UserId, Vec<ClientId>)>, CoreError>;
    async fn fetch_legal_hold_status(&self) -> Result<LegalHoldStatus, CoreError>;
    async fn fetch_feature_flags(&self) -> Result<FeatureFlags, CoreError>;
    async fn fetch_prekey(&self, user: &UserId, client: &ClientId) -> Result<Prekey, CoreError>;

    /// Events accumulated since the given checkpoint, oldest first.
    async fn fetch_pending_events(&self, since: Option<String>) -> Result<EventBatch, CoreError>;

    /// Live, ordered stream of backend events. The transport reconnects
    /// internally; a closed channel means the connection is gone for good.
    async fn open_event_stream(&self) -> Result<mpsc::UnboundedReceiver<Event>, CoreError>;

    /// Sends one pairwise-encrypted message; returns the server timestamp.
    async fn send_pairwise_message(
        &self,
        conversation: &ConversationId,
        sender: &ClientId,
        recipients: Vec<RecipientEnvelope>,
    ) -> Result<u64, CoreError>;

    /// Sends one group-encrypted message; returns the server timestamp.
    async fn send_group_message(
        &self,
        group: &GroupId,
        ciphertext: Vec<u8>,
    ) -> Result<u64, CoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    Pairwise {
        conversation: ConversationId,
        sender: ClientId,
        recipients: Vec<RecipientEnvelope>,
    },
    Group {
        group: GroupId,
        ciphertext: Vec<u8>,
    },
}

#[derive(Default)]
struct BackendState {
    self_user: Option<UserProfile>,
    users: Vec<UserProfile>,
    connections: Vec<Connection>,
    conversations: Vec<ConversationSnapshot>,
    user_clients: HashMap<String, Vec<ClientId>>,
    pending_events: Vec<Event>,
    lost_history: bool,
    stream_tx: Option<mpsc::UnboundedSender<Event>>,
    stream_backlog: Vec<Event>,
    sent: Vec<SentMessage>,
    send_failures: VecDeque<CoreError>,
    fetch_failures: VecDeque<CoreError>,
    fetch_delay_ms: Option<u64>,
    calls: Vec<String>,
    prekey_requests: Vec<(UserId, ClientId)>,
    legal_hold: LegalHoldStatus,
    feature_flags: FeatureFlags,
}

impl Default for LegalHoldStatus {
    fn default() -> Self {
        LegalHoldStatus::Disabled
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            file_sharing_enabled: true,
            read_receipts_default: false,
        }
    }
}

/// Scriptable in-memory backend for tests and local development.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_self_user(&self, profile: UserProfile) {
        self.state.lock().await.self_user = Some(profile);
    }

    pub async fn add_user(&self, profile: UserProfile) {
        self.state.lock().await.users.push(profile);
    }

    pub async fn add_connection(&self, connection: Connection) {
        self.state.lock().await.connections.push(connection);
    }

    pub async fn add_conversation(&self, snapshot: ConversationSnapshot) {
        self.state.lock().await.conversations.push(snapshot);
    }

    pub async fn set_user_clients(&self, user: &UserId, clients: Vec<ClientId>) {
        self.state
            .lock()
            .await
            .user_clients
            .insert(user.to_string(), clients);
    }

    pub async fn queue_pending_event(&self, event: Event) {
        self.state.lock().await.pending_events.push(event);
    }

    pub async fn mark_history_lost(&self) {
        self.state.lock().await.lost_history = true;
    }

    /// Pushes an event into the live stream, or queues it until a stream is
    /// opened.
    pub async fn push_live_event(&self, event: Event) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match &state.stream_tx {
            Some(tx) if tx.send(event.clone()).is_ok() => {}
            _ => state.stream_backlog.push(event),
        }
    }

    /// Drops the live stream, as a transport-level disconnect would.
    pub async fn close_stream(&self) {
        self.state.lock().await.stream_tx = None;
    }

    /// Fails the next send operation with the given error.
    pub async fn fail_next_send(&self, error: CoreError) {
        self.state.lock().await.send_failures.push_back(error);
    }

    /// Fails the next REST fetch with the given error.
    pub async fn fail_next_fetch(&self, error: CoreError) {
        self.state.lock().await.fetch_failures.push_back(error);
    }

    /// Stalls the next REST fetch, e.g. to cancel a sync mid-flight.
    pub async fn delay_next_fetch_ms(&self, delay_ms: u64) {
        self.state.lock().await.fetch_delay_ms = Some(delay_ms);
    }

    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    /// Names of the gateway calls performed so far, in order.
    pub async fn recorded_calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn prekey_requests(&self) -> Vec<(UserId, ClientId)> {
        self.state.lock().await.prekey_requests.clone()
    }

    async fn enter_fetch(&self, name: &str) -> Result<(), CoreError> {
        let (failure, delay) = {
            let mut state = self.state.lock().await;
            state.calls.push(name.to_string());
            (state.fetch_failures.pop_front(), state.fetch_delay_ms.take())
        };
        if let Some(delay_ms) = delay {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NetworkGateway for InMemoryBackend {
    async fn fetch_self_user(&self) -> Result<UserProfile, CoreError> {
        self.enter_fetch("fetch_self_user").await?;
        self.state
            .lock()
            .await
            .self_user
            .clone()
            .ok_or_else(|| NetworkFailure::ServerMiscommunication("no self user".to_string()).into())
    }

    async fn fetch_users(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, CoreError> {
        self.enter_fetch("fetch_users").await?;
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn fetch_connection_page(
        &self,
        _paging_state: Option<String>,
    ) -> Result<Page<Connection>, CoreError> {
        self.enter_fetch("fetch_connection_page").await?;
        let state = self.state.lock().await;
        Ok(Page {
            items: state.connections.clone(),
            paging_state: None,
            has_more: false,
        })
    }

    async fn fetch_conversation_page(
        &self,
        _paging_state: Option<String>,
    ) -> Result<Page<ConversationSnapshot>, CoreError> {
        self.enter_fetch("fetch_conversation_page").await?;
        let state = self.state.lock().await;
        Ok(Page {
            items: state.conversations.clone(),
            paging_state: None,
            has_more: false,
        })
    }

    async fn fetch_user_clients(
        &self,
        users: &[UserId],
    ) -> Result<Vec<(UserId, Vec<ClientId>)>, CoreError> {
        self.enter_fetch("fetch_user_clients").await?;
        let state = self.state.lock().await;
        Ok(users
            .iter()
            .map(|user| {
                let clients = state
                    .user_clients
                    .get(&user.to_string())
                    .cloned()
                    .unwrap_or_default();
                (user.clone(), clients)
            })
            .collect())
    }

    async fn fetch_legal_hold_status(&self) -> Result<LegalHoldStatus, CoreError> {
        self.enter_fetch("fetch_legal_hold_status").await?;
        Ok(self.state.lock().await.legal_hold)
    }

    async fn fetch_feature_flags(&self) -> Result<FeatureFlags, CoreError> {
        self.enter_fetch("fetch_feature_flags").await?;
        Ok(self.state.lock().await.feature_flags.clone())
    }

    async fn fetch_prekey(&self, user: &UserId, client: &ClientId) -> Result<Prekey, CoreError> {
        self.enter_fetch("fetch_prekey").await?;
        self.state
            .lock()
            .await
            .prekey_requests
            .push((user.clone(), client.clone()));
        Ok(Prekey {
            id: 1,
            key: format!("prekey:{}:{}", user, client).into_bytes(),
        })
    }

    async fn fetch_pending_events(&self, since: Option<String>) -> Result<EventBatch, CoreError> {
        self.enter_fetch("fetch_pending_events").await?;
        let mut state = self.state.lock().await;
        if state.lost_history {
            // Reported once; a fresh slow sync re-baselines the replica.
            state.lost_history = false;
            return Ok(EventBatch {
                events: Vec::new(),
                lost_history: true,
            });
        }
        let events = match since {
            None => state.pending_events.clone(),
            Some(id) => state
                .pending_events
                .iter()
                .skip_while(|e| e.id != id)
                .skip(1)
                .cloned()
                .collect(),
        };
        Ok(EventBatch {
            events,
            lost_history: false,
        })
    }

    async fn open_event_stream(&self) -> Result<mpsc::UnboundedReceiver<Event>, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        for event in state.stream_backlog.drain(..) {
            let _ = tx.send(event);
        }
        state.stream_tx = Some(tx);
        Ok(rx)
    }

    async fn send_pairwise_message(
        &self,
        conversation: &ConversationId,
        sender: &ClientId,
        recipients: Vec<RecipientEnvelope>,
    ) -> Result<u64, CoreError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        state.sent.push(SentMessage::Pairwise {
            conversation: conversation.clone(),
            sender: sender.clone(),
            recipients,
        });
        Ok(now_ms())
    }

    async fn send_group_message(
        &self,
        group: &GroupId,
        ciphertext: Vec<u8>,
    ) -> Result<u64, CoreError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        state.sent.push(SentMessage::Group {
            group: group.clone(),
            ciphertext,
        });
        Ok(now_ms())
    }
}
