use crate::config::CoreConfig;
use crate::conversation::ConversationRepository;
use crate::error::CoreError;
use crate::network::NetworkGateway;
use crate::store::MetadataRepository;
use crate::sync::{SlowSyncStatus, SlowSyncStep, SyncCriteria, SyncRepository};
use crate::time::now_ms;
use crate::users::UserRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Runs the one-time full-state bootstrap: page through backend snapshots
/// and write them through the persistence gateway, one step at a time.
#[derive(Clone)]
pub struct SlowSyncWorker {
    gateway: Arc<dyn NetworkGateway>,
    users: UserRepository,
    conversations: ConversationRepository,
    metadata: MetadataRepository,
}

impl SlowSyncWorker {
    pub fn new(
        gateway: Arc<dyn NetworkGateway>,
        users: UserRepository,
        conversations: ConversationRepository,
        metadata: MetadataRepository,
    ) -> Self {
        Self {
            gateway,
            users,
            conversations,
            metadata,
        }
    }

    /// Executes every step in order, reporting `Ongoing(step)` before each.
    pub async fn execute(&self, sync: &SyncRepository) -> Result<(), CoreError> {
        for step in SlowSyncStep::ALL {
            info!(?step, "performing slow sync step");
            sync.update_slow_sync_status(SlowSyncStatus::Ongoing(step));
            self.run_step(step).await?;
        }
        Ok(())
    }

    async fn run_step(&self, step: SlowSyncStep) -> Result<(), CoreError> {
        match step {
            SlowSyncStep::SelfUser => {
                let profile = self.gateway.fetch_self_user().await?;
                self.users.persist_profiles(&[profile])
            }
            SlowSyncStep::Connections => {
                let mut paging_state = None;
                loop {
                    let page = self.gateway.fetch_connection_page(paging_state).await?;
                    self.users.persist_connections(&page.items)?;
                    if !page.has_more {
                        return Ok(());
                    }
                    paging_state = page.paging_state;
                }
            }
            SlowSyncStep::Conversations => {
                let mut paging_state = None;
                loop {
                    let page = self.gateway.fetch_conversation_page(paging_state).await?;
                    for snapshot in &page.items {
                        self.conversations.persist_snapshot(snapshot)?;
                    }
                    if !page.has_more {
                        return Ok(());
                    }
                    paging_state = page.paging_state;
                }
            }
            SlowSyncStep::ConversationMembers => {
                for conversation in self.conversations.all()? {
                    let members = self.conversations.members(&conversation.id)?;
                    if members.is_empty() {
                        continue;
                    }
                    let user_ids: Vec<_> = members.iter().map(|m| m.user_id.clone()).collect();
                    for (user_id, clients) in
                        self.gateway.fetch_user_clients(&user_ids).await?
                    {
                        self.conversations
                            .set_member_clients(&conversation.id, &user_id, clients)?;
                    }
                }
                Ok(())
            }
            SlowSyncStep::LegalHold => {
                let status = self.gateway.fetch_legal_hold_status().await?;
                self.metadata.put("legal_hold", &status)
            }
            SlowSyncStep::FeatureFlags => {
                let flags = self.gateway.fetch_feature_flags().await?;
                self.metadata.put("feature_flags", &flags)
            }
        }
    }
}

/// Starts and stops the full sync based on externally supplied criteria.
///
/// Exactly one sync attempt is ever in flight: the manager is a single task
/// and the bootstrap runs inside its loop. Ideally the bootstrap runs once
/// per client registration, but incremental sync may invalidate the last
/// completion when it loses event history, forcing a re-run here.
pub struct SlowSyncManager;

impl SlowSyncManager {
    pub fn start(
        criteria: watch::Receiver<SyncCriteria>,
        sync: SyncRepository,
        worker: SlowSyncWorker,
        config: CoreConfig,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::monitor(criteria, sync, worker, config))
    }

    async fn monitor(
        mut criteria: watch::Receiver<SyncCriteria>,
        sync: SyncRepository,
        worker: SlowSyncWorker,
        config: CoreConfig,
    ) {
        loop {
            if !criteria.borrow_and_update().is_ready() {
                sync.update_slow_sync_status(SlowSyncStatus::Pending);
                if criteria.changed().await.is_err() {
                    return;
                }
                continue;
            }
            if Self::is_sync_needed(&sync, &config) {
                info!("slow sync criteria met and sync needed, starting bootstrap");
                match Self::run_cancellable(&mut criteria, &sync, &worker).await {
                    RunOutcome::Cancelled => {
                        // Criteria flipped mid-run; nothing is marked complete.
                        info!("slow sync cancelled, criteria no longer met");
                        sync.update_slow_sync_status(SlowSyncStatus::Pending);
                        continue;
                    }
                    RunOutcome::Finished(Ok(())) => {
                        info!("slow sync completed, recording completion instant");
                        if let Err(error) = sync.set_last_slow_sync_completion(now_ms()) {
                            warn!(%error, "failed to persist slow sync completion");
                        }
                        sync.update_slow_sync_status(SlowSyncStatus::Complete);
                    }
                    RunOutcome::Finished(Err(cause)) => {
                        warn!(%cause, "slow sync failed, retrying after delay");
                        sync.update_slow_sync_status(SlowSyncStatus::Failed(cause));
                        tokio::time::sleep(Duration::from_millis(
                            config.slow_sync_retry_delay_ms,
                        ))
                        .await;
                        continue;
                    }
                }
            } else {
                info!("slow sync already performed recently, marking complete");
                sync.update_slow_sync_status(SlowSyncStatus::Complete);
            }
            // Idle until the criteria change or the completion checkpoint is
            // invalidated by incremental sync. Subscribing before the
            // re-check closes the window where an invalidation lands between
            // completing and idling.
            let mut completion = sync.observe_last_slow_sync_completion();
            if Self::is_sync_needed(&sync, &config) {
                continue;
            }
            tokio::select! {
                res = criteria.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
                res = completion.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn is_sync_needed(sync: &SyncRepository, config: &CoreConfig) -> bool {
        match sync.last_slow_sync_completion_ms() {
            None => true,
            Some(last) => now_ms() > last.saturating_add(config.min_time_between_slow_syncs_ms),
        }
    }

    async fn run_cancellable(
        criteria: &mut watch::Receiver<SyncCriteria>,
        sync: &SyncRepository,
        worker: &SlowSyncWorker,
    ) -> RunOutcome {
        let run = worker.execute(sync);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => RunOutcome::Finished(result),
            changed = criteria.wait_for(|c| !c.is_ready()) => {
                match changed {
                    Ok(_) => RunOutcome::Cancelled,
                    Err(_) => RunOutcome::Finished(Err(CoreError::Unknown(
                        "criteria stream closed".to_string(),
                    ))),
                }
            }
        }
    }
}

enum RunOutcome {
    Finished(Result<(), CoreError>),
    Cancelled,
}
