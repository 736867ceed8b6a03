use super::{build_core, other_client, other_user, proteus_group_snapshot, qid, self_user};
use crate::error::NetworkFailure;
use crate::network::SentMessage;
use crate::sync::{IncrementalSyncStatus, SlowSyncStatus};

async fn synced_core() -> (super::TestCore, crate::ids::ConversationId) {
    let t = build_core();
    let conversation = qid("conv-a");
    t.core
        .conversations
        .persist_snapshot(&proteus_group_snapshot(&conversation))
        .expect("persist");
    t.core
        .conversations
        .set_member_clients(&conversation, &other_user(), vec![other_client()])
        .expect("clients");
    t.core.sync.update_slow_sync_status(SlowSyncStatus::Complete);
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::Live);
    (t, conversation)
}

#[tokio::test]
async fn toggling_adds_then_removes_a_reaction() {
    let (t, conversation) = synced_core().await;

    t.core
        .toggle_reaction(&conversation, "msg-1", "👍")
        .await
        .expect("add");
    let reactions = t
        .core
        .reactions
        .reactions_of(&conversation, "msg-1", &self_user())
        .expect("reactions");
    assert!(reactions.contains("👍"));

    t.core
        .toggle_reaction(&conversation, "msg-1", "👍")
        .await
        .expect("remove");
    let reactions = t
        .core
        .reactions
        .reactions_of(&conversation, "msg-1", &self_user())
        .expect("reactions");
    assert!(reactions.is_empty());

    // Both toggles produced a signaling send.
    assert_eq!(t.backend.sent_messages().await.len(), 2);
}

#[tokio::test]
async fn failed_send_rolls_back_the_optimistic_reaction() {
    let (t, conversation) = synced_core().await;
    t.backend
        .fail_next_send(NetworkFailure::Federation("rejected".to_string()).into())
        .await;

    let result = t.core.toggle_reaction(&conversation, "msg-1", "👍").await;
    assert!(result.is_err());

    // The optimistic insert was compensated.
    let reactions = t
        .core
        .reactions
        .reactions_of(&conversation, "msg-1", &self_user())
        .expect("reactions");
    assert!(reactions.is_empty());
}

#[tokio::test]
async fn failed_removal_rolls_the_reaction_back_in() {
    let (t, conversation) = synced_core().await;
    t.core
        .toggle_reaction(&conversation, "msg-1", "👍")
        .await
        .expect("add");

    t.backend
        .fail_next_send(NetworkFailure::Federation("rejected".to_string()).into())
        .await;
    let result = t.core.toggle_reaction(&conversation, "msg-1", "👍").await;
    assert!(result.is_err());

    let reactions = t
        .core
        .reactions
        .reactions_of(&conversation, "msg-1", &self_user())
        .expect("reactions");
    assert!(reactions.contains("👍"));
}

#[tokio::test]
async fn reaction_signaling_bypasses_the_live_gate() {
    let (t, conversation) = synced_core().await;
    // Still catching up: only slow sync is complete.
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::FetchingPendingEvents);

    t.core
        .toggle_reaction(&conversation, "msg-1", "🎉")
        .await
        .expect("toggle while catching up");

    let sent = t.backend.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], SentMessage::Pairwise { .. }));
}
