use super::{build_core, proteus_group_snapshot, qid, self_user, wait_for_status};
use crate::error::NetworkFailure;
use crate::sync::{SlowSyncStatus, SlowSyncStep, SyncCriteria};
use crate::time::now_ms;
use crate::users::UserProfile;
use std::time::Duration;
use tokio::time::sleep;

const SEVEN_DAYS_MS: u64 = 7 * 24 * 60 * 60 * 1000;

fn self_profile() -> UserProfile {
    UserProfile {
        id: self_user(),
        name: "Self".to_string(),
        handle: Some("self".to_string()),
    }
}

#[tokio::test]
async fn stays_pending_while_criteria_are_not_met() {
    let mut t = build_core();
    t.core.start_sync();
    let status = t.core.observe_slow_sync_status();

    sleep(Duration::from_millis(150)).await;

    assert_eq!(*status.borrow(), SlowSyncStatus::Pending);
    assert!(t.backend.recorded_calls().await.is_empty());
}

#[tokio::test]
async fn runs_all_steps_in_order_and_records_completion() {
    let mut t = build_core();
    t.backend.set_self_user(self_profile()).await;
    t.backend
        .add_conversation(proteus_group_snapshot(&qid("conv-a")))
        .await;
    t.core.start_sync();
    let mut status = t.core.observe_slow_sync_status();

    let before = now_ms();
    t.criteria_tx.send_replace(SyncCriteria::Ready);
    wait_for_status(&mut status, |s| matches!(s, SlowSyncStatus::Complete)).await;

    let completion = t
        .core
        .sync
        .last_slow_sync_completion_ms()
        .expect("completion recorded");
    assert!(completion >= before);

    let calls = t.backend.recorded_calls().await;
    let bootstrap: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .filter(|c| *c != "fetch_pending_events")
        .collect();
    assert_eq!(
        bootstrap,
        vec![
            "fetch_self_user",
            "fetch_connection_page",
            "fetch_conversation_page",
            "fetch_user_clients",
            "fetch_legal_hold_status",
            "fetch_feature_flags",
        ]
    );
}

#[tokio::test]
async fn recent_completion_skips_the_bootstrap() {
    let mut t = build_core();
    t.core
        .sync
        .set_last_slow_sync_completion(now_ms())
        .expect("set completion");
    t.core.start_sync();
    let mut status = t.core.observe_slow_sync_status();

    t.criteria_tx.send_replace(SyncCriteria::Ready);
    wait_for_status(&mut status, |s| matches!(s, SlowSyncStatus::Complete)).await;

    let calls = t.backend.recorded_calls().await;
    assert!(!calls.contains(&"fetch_self_user".to_string()));
}

#[tokio::test]
async fn stale_completion_triggers_a_fresh_bootstrap() {
    let mut t = build_core();
    t.backend.set_self_user(self_profile()).await;
    let stale = now_ms() - SEVEN_DAYS_MS - 60_000;
    t.core
        .sync
        .set_last_slow_sync_completion(stale)
        .expect("set completion");
    t.core.start_sync();
    let mut status = t.core.observe_slow_sync_status();

    t.criteria_tx.send_replace(SyncCriteria::Ready);
    wait_for_status(&mut status, |s| matches!(s, SlowSyncStatus::Complete)).await;

    let calls = t.backend.recorded_calls().await;
    assert!(calls.contains(&"fetch_self_user".to_string()));
    let completion = t.core.sync.last_slow_sync_completion_ms().expect("updated");
    assert!(completion > stale);
}

#[tokio::test]
async fn step_failure_reports_failed_then_retries() {
    let mut t = build_core();
    t.backend.set_self_user(self_profile()).await;
    t.backend
        .fail_next_fetch(NetworkFailure::NoConnectivity.into())
        .await;
    t.core.start_sync();
    let mut status = t.core.observe_slow_sync_status();

    t.criteria_tx.send_replace(SyncCriteria::Ready);
    wait_for_status(&mut status, |s| matches!(s, SlowSyncStatus::Failed(_))).await;
    assert_eq!(t.core.sync.last_slow_sync_completion_ms(), None);

    // The recovery policy retries after the configured delay and succeeds.
    wait_for_status(&mut status, |s| matches!(s, SlowSyncStatus::Complete)).await;
    assert!(t.core.sync.last_slow_sync_completion_ms().is_some());
}

#[tokio::test]
async fn losing_criteria_mid_run_cancels_without_completing() {
    let mut t = build_core();
    t.backend.set_self_user(self_profile()).await;
    t.backend.delay_next_fetch_ms(10_000).await;
    t.core.start_sync();
    let mut status = t.core.observe_slow_sync_status();

    t.criteria_tx.send_replace(SyncCriteria::Ready);
    wait_for_status(&mut status, |s| {
        matches!(s, SlowSyncStatus::Ongoing(SlowSyncStep::SelfUser))
    })
    .await;

    t.criteria_tx
        .send_replace(SyncCriteria::MissingRequirement("offline".to_string()));
    wait_for_status(&mut status, |s| matches!(s, SlowSyncStatus::Pending)).await;

    // The cancelled run must not have produced a completion instant.
    assert_eq!(t.core.sync.last_slow_sync_completion_ms(), None);

    // Once the criteria hold again, the bootstrap completes normally.
    t.criteria_tx.send_replace(SyncCriteria::Ready);
    wait_for_status(&mut status, |s| matches!(s, SlowSyncStatus::Complete)).await;
    assert!(t.core.sync.last_slow_sync_completion_ms().is_some());
}
