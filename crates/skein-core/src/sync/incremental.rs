use crate::error::{CoreError, NetworkFailure};
use crate::event::Event;
use crate::handlers::EventProcessor;
use crate::network::NetworkGateway;
use crate::sync::{IncrementalSyncStatus, SlowSyncStatus, SyncRepository};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Keeps the local replica live by applying backend deltas in order.
///
/// Gated on slow sync being complete; mirrors its criteria handling by
/// dropping to `Pending` whenever the gate is lost. Events are processed
/// strictly sequentially on this manager's single task: the remote event log
/// order is the consistency backbone and two events are never handled
/// concurrently.
pub struct IncrementalSyncManager;

enum CycleEnd {
    /// Slow sync left `Complete`; wait for the gate again.
    GateLost,
    /// Event history was lost; a fresh slow sync has been forced.
    OutOfSync,
    /// The stream or a fetch failed; report and retry from the gate.
    Failed(CoreError),
}

impl IncrementalSyncManager {
    pub fn start(
        sync: SyncRepository,
        gateway: Arc<dyn NetworkGateway>,
        processor: Arc<EventProcessor>,
        retry_delay_ms: u64,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::monitor(sync, gateway, processor, retry_delay_ms))
    }

    async fn monitor(
        sync: SyncRepository,
        gateway: Arc<dyn NetworkGateway>,
        processor: Arc<EventProcessor>,
        retry_delay_ms: u64,
    ) {
        let mut slow_status = sync.observe_slow_sync_status();
        loop {
            sync.update_incremental_sync_status(IncrementalSyncStatus::Pending);
            if slow_status
                .wait_for(|s| matches!(s, SlowSyncStatus::Complete))
                .await
                .is_err()
            {
                return;
            }
            match Self::run_cycle(&sync, &gateway, &processor, &mut slow_status).await {
                CycleEnd::GateLost => {
                    info!("incremental sync paused, slow sync gate lost");
                }
                CycleEnd::OutOfSync => {
                    warn!("incremental sync out of sync, forcing a fresh slow sync");
                    // Hold until the slow sync manager has picked up the
                    // invalidated checkpoint, otherwise this loop would race
                    // straight back into the same gap.
                    if slow_status
                        .wait_for(|s| !matches!(s, SlowSyncStatus::Complete))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                CycleEnd::Failed(cause) => {
                    warn!(%cause, "incremental sync failed, retrying after delay");
                    sync.update_incremental_sync_status(IncrementalSyncStatus::Failed(cause));
                    tokio::time::sleep(std::time::Duration::from_millis(retry_delay_ms)).await;
                }
            }
        }
    }

    /// One connection lifetime: drain pending events, then stream live ones.
    async fn run_cycle(
        sync: &SyncRepository,
        gateway: &Arc<dyn NetworkGateway>,
        processor: &Arc<EventProcessor>,
        slow_status: &mut watch::Receiver<SlowSyncStatus>,
    ) -> CycleEnd {
        sync.update_incremental_sync_status(IncrementalSyncStatus::FetchingPendingEvents);
        let since = match sync.last_processed_event_id() {
            Ok(since) => since,
            Err(error) => return CycleEnd::Failed(error),
        };
        let batch = match gateway.fetch_pending_events(since).await {
            Ok(batch) => batch,
            Err(error) => return CycleEnd::Failed(error),
        };
        if batch.lost_history {
            // Events were dropped by the backend; the local replica cannot
            // be patched by deltas anymore.
            if let Err(error) = sync.clear_last_slow_sync_completion() {
                return CycleEnd::Failed(error);
            }
            return CycleEnd::OutOfSync;
        }
        for event in &batch.events {
            Self::apply_event(sync, processor, event).await;
        }
        let mut stream = match gateway.open_event_stream().await {
            Ok(stream) => stream,
            Err(error) => return CycleEnd::Failed(error),
        };
        sync.update_incremental_sync_status(IncrementalSyncStatus::Live);
        info!("incremental sync live");
        loop {
            tokio::select! {
                // biased so the gate check wins over a burst of events.
                biased;
                gate = async {
                    slow_status
                        .wait_for(|s| !matches!(s, SlowSyncStatus::Complete))
                        .await
                        .map(|_| ())
                } => {
                    return match gate {
                        Ok(_) => CycleEnd::GateLost,
                        Err(_) => CycleEnd::Failed(CoreError::Unknown(
                            "slow sync status stream closed".to_string(),
                        )),
                    };
                }
                event = stream.recv() => {
                    match event {
                        Some(event) => Self::apply_event(sync, processor, &event).await,
                        None => {
                            return CycleEnd::Failed(NetworkFailure::NoConnectivity.into());
                        }
                    }
                }
            }
        }
    }

    /// Applies one event and records the checkpoint. A failing event is
    /// logged and skipped; the stream must keep moving.
    async fn apply_event(sync: &SyncRepository, processor: &Arc<EventProcessor>, event: &Event) {
        if let Err(error) = processor.process(event).await {
            warn!(event = %event.id, %error, "skipping event after processing failure");
        }
        if let Err(error) = sync.set_last_processed_event_id(&event.id) {
            warn!(event = %event.id, %error, "failed to persist event checkpoint");
        }
    }
}
