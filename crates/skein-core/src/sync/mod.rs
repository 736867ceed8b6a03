pub mod incremental;
pub mod slow;

use crate::error::CoreError;
use crate::store::MetadataRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

const LAST_SLOW_SYNC_COMPLETION_KEY: &str = "last_slow_sync_completion_ms";
const LAST_EVENT_ID_KEY: &str = "last_event_id";

/// Whether the preconditions for syncing hold: registered client, valid
/// credentials, network reachability. Produced outside the core and fed in
/// as a watch stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncCriteria {
    Ready,
    MissingRequirement(String),
}

impl SyncCriteria {
    pub fn is_ready(&self) -> bool {
        matches!(self, SyncCriteria::Ready)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlowSyncStep {
    SelfUser,
    Connections,
    Conversations,
    ConversationMembers,
    LegalHold,
    FeatureFlags,
}

impl SlowSyncStep {
    pub const ALL: [SlowSyncStep; 6] = [
        SlowSyncStep::SelfUser,
        SlowSyncStep::Connections,
        SlowSyncStep::Conversations,
        SlowSyncStep::ConversationMembers,
        SlowSyncStep::LegalHold,
        SlowSyncStep::FeatureFlags,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlowSyncStatus {
    Pending,
    Ongoing(SlowSyncStep),
    Complete,
    Failed(CoreError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncrementalSyncStatus {
    Pending,
    FetchingPendingEvents,
    Live,
    Failed(CoreError),
}

/// Holds both sync state machines' observable status and the persisted sync
/// checkpoints. The watch channels are the status streams consumed by the
/// managers, the sender gate and the UI layer.
#[derive(Clone)]
pub struct SyncRepository {
    metadata: MetadataRepository,
    slow_tx: Arc<watch::Sender<SlowSyncStatus>>,
    incremental_tx: Arc<watch::Sender<IncrementalSyncStatus>>,
    completion_tx: Arc<watch::Sender<Option<u64>>>,
}

impl SyncRepository {
    pub fn new(metadata: MetadataRepository) -> Result<Self, CoreError> {
        let persisted_completion = metadata.get::<u64>(LAST_SLOW_SYNC_COMPLETION_KEY)?;
        let (slow_tx, _) = watch::channel(SlowSyncStatus::Pending);
        let (incremental_tx, _) = watch::channel(IncrementalSyncStatus::Pending);
        let (completion_tx, _) = watch::channel(persisted_completion);
        Ok(Self {
            metadata,
            slow_tx: Arc::new(slow_tx),
            incremental_tx: Arc::new(incremental_tx),
            completion_tx: Arc::new(completion_tx),
        })
    }

    pub fn metadata(&self) -> MetadataRepository {
        self.metadata.clone()
    }

    pub fn update_slow_sync_status(&self, status: SlowSyncStatus) {
        self.slow_tx.send_replace(status);
    }

    pub fn slow_sync_status(&self) -> SlowSyncStatus {
        self.slow_tx.borrow().clone()
    }

    pub fn observe_slow_sync_status(&self) -> watch::Receiver<SlowSyncStatus> {
        self.slow_tx.subscribe()
    }

    pub fn update_incremental_sync_status(&self, status: IncrementalSyncStatus) {
        self.incremental_tx.send_replace(status);
    }

    pub fn incremental_sync_status(&self) -> IncrementalSyncStatus {
        self.incremental_tx.borrow().clone()
    }

    pub fn observe_incremental_sync_status(&self) -> watch::Receiver<IncrementalSyncStatus> {
        self.incremental_tx.subscribe()
    }

    pub fn last_slow_sync_completion_ms(&self) -> Option<u64> {
        *self.completion_tx.borrow()
    }

    pub fn observe_last_slow_sync_completion(&self) -> watch::Receiver<Option<u64>> {
        self.completion_tx.subscribe()
    }

    pub fn set_last_slow_sync_completion(&self, at_ms: u64) -> Result<(), CoreError> {
        self.metadata.put(LAST_SLOW_SYNC_COMPLETION_KEY, &at_ms)?;
        self.completion_tx.send_replace(Some(at_ms));
        Ok(())
    }

    /// Forgets the last completion, forcing the next criteria evaluation to
    /// run a fresh full sync.
    pub fn clear_last_slow_sync_completion(&self) -> Result<(), CoreError> {
        self.metadata.delete(LAST_SLOW_SYNC_COMPLETION_KEY)?;
        self.completion_tx.send_replace(None);
        Ok(())
    }

    pub fn last_processed_event_id(&self) -> Result<Option<String>, CoreError> {
        self.metadata.get(LAST_EVENT_ID_KEY)
    }

    pub fn set_last_processed_event_id(&self, id: &str) -> Result<(), CoreError> {
        self.metadata.put(LAST_EVENT_ID_KEY, &id)
    }

    /// Suspends until incremental sync reaches `Live`. Used as the gate for
    /// regular (non-signaling) outgoing traffic.
    pub async fn wait_until_live(&self) -> Result<(), CoreError> {
        let mut rx = self.incremental_tx.subscribe();
        rx.wait_for(|status| matches!(status, IncrementalSyncStatus::Live))
            .await
            .map(|_| ())
            .map_err(|_| CoreError::Unknown("sync status stream closed".to_string()))
    }

    /// Suspends until the one-time full sync has completed at least once.
    pub async fn wait_until_slow_sync_complete(&self) -> Result<(), CoreError> {
        let mut rx = self.slow_tx.subscribe();
        rx.wait_for(|status| matches!(status, SlowSyncStatus::Complete))
            .await
            .map(|_| ())
            .map_err(|_| CoreError::Unknown("sync status stream closed".to_string()))
    }
}
