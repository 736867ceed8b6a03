use crate::ids::{ClientId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreConfig {
    pub self_user_id: UserId,
    pub self_client_id: ClientId,
    /// Delay before a failed full sync is attempted again.
    pub slow_sync_retry_delay_ms: u64,
    /// Minimum interval between two successful full syncs.
    pub min_time_between_slow_syncs_ms: u64,
    pub event_channel_capacity: usize,
}

const SLOW_SYNC_RETRY_DELAY_MS: u64 = 10_000;
const MIN_TIME_BETWEEN_SLOW_SYNCS_MS: u64 = 7 * 24 * 60 * 60 * 1000;

impl CoreConfig {
    pub fn new(self_user_id: UserId, self_client_id: ClientId) -> Self {
        Self {
            self_user_id,
            self_client_id,
            slow_sync_retry_delay_ms: SLOW_SYNC_RETRY_DELAY_MS,
            min_time_between_slow_syncs_ms: MIN_TIME_BETWEEN_SLOW_SYNCS_MS,
            event_channel_capacity: 256,
        }
    }
}
