use super::{
    build_core, mls_group_snapshot, other_client, other_user, proteus_group_snapshot, qid,
    self_client, self_user,
};
use crate::crypto::GroupCryptoProvider;
use crate::error::NetworkFailure;
use crate::ids::GroupId;
use crate::message::{EditStatus, MessageContent, MessageStatus, RegularMessage};
use crate::network::SentMessage;
use crate::sync::{IncrementalSyncStatus, SlowSyncStatus};
use std::time::Duration;

async fn synced_proteus_core() -> (super::TestCore, crate::ids::ConversationId) {
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
    t.core
        .conversations
        .set_member_clients(&conversation, &self_user(), vec![self_client()])
        .expect("self clients");
    t.core.sync.update_slow_sync_status(SlowSyncStatus::Complete);
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::Live);
    (t, conversation)
}

#[tokio::test]
async fn sends_text_message_and_marks_it_sent() {
    let (t, conversation) = synced_proteus_core().await;

    let id = t
        .core
        .send_text_message(&conversation, "hello")
        .await
        .expect("send");

    let message = t.core.messages.require(&conversation, &id).expect("get");
    assert_eq!(message.status, MessageStatus::Sent);

    let sent = t.backend.sent_messages().await;
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        SentMessage::Pairwise {
            conversation: sent_conversation,
            sender,
            recipients,
        } => {
            assert_eq!(sent_conversation, &conversation);
            assert_eq!(sender, &self_client());
            // One ciphertext per recipient device, own sending device
            // excluded.
            assert_eq!(recipients.len(), 1);
            assert_eq!(recipients[0].user_id, other_user());
            assert_eq!(recipients[0].client_id, other_client());
        }
        other => panic!("expected pairwise send, got {:?}", other),
    }
}

#[tokio::test]
async fn establishes_missing_sessions_once_and_reuses_them() {
    let (t, conversation) = synced_proteus_core().await;

    t.core
        .send_text_message(&conversation, "first")
        .await
        .expect("first send");
    assert_eq!(t.backend.prekey_requests().await.len(), 1);

    t.core
        .send_text_message(&conversation, "second")
        .await
        .expect("second send");
    // The established session is reused; no further prekey fetches.
    assert_eq!(t.backend.prekey_requests().await.len(), 1);
}

#[tokio::test]
async fn backend_rejection_marks_the_message_failed_but_keeps_it() {
    let (t, conversation) = synced_proteus_core().await;
    t.backend
        .fail_next_send(NetworkFailure::Federation("remote backend down".to_string()).into())
        .await;

    let result = t.core.send_text_message(&conversation, "doomed").await;
    assert!(result.is_err());

    let messages = t.core.messages.list(&conversation).expect("list");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Failed);
}

#[tokio::test]
async fn transient_failure_leaves_the_message_pending_for_retry() {
    let (t, conversation) = synced_proteus_core().await;
    t.backend
        .fail_next_send(NetworkFailure::NoConnectivity.into())
        .await;

    let result = t.core.send_text_message(&conversation, "later").await;
    assert!(result.is_err());

    let messages = t.core.messages.list(&conversation).expect("list");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Pending);

    // Manual retry of the pending message succeeds.
    t.core
        .sender
        .send_pending_message(&conversation, &messages[0].id)
        .await
        .expect("retry");
    let retried = t
        .core
        .messages
        .require(&conversation, &messages[0].id)
        .expect("get");
    assert_eq!(retried.status, MessageStatus::Sent);
}

#[tokio::test]
async fn group_conversation_sends_one_ciphertext_for_the_group() {
    let t = build_core();
    let conversation = qid("conv-mls");
    let group = GroupId::new("group-a");
    t.core
        .conversations
        .persist_snapshot(&mls_group_snapshot(&conversation, &group))
        .expect("persist");
    t.group.create_group(&group).await.expect("group");
    t.core.sync.update_slow_sync_status(SlowSyncStatus::Complete);
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::Live);

    t.core
        .send_knock(&conversation, true)
        .await
        .expect("send");

    let sent = t.backend.sent_messages().await;
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        SentMessage::Group {
            group: sent_group,
            ciphertext,
        } => {
            assert_eq!(sent_group, &group);
            assert!(ciphertext.starts_with(b"group:"));
        }
        other => panic!("expected group send, got {:?}", other),
    }
}

#[tokio::test]
async fn member_changes_are_committed_by_the_next_group_send() {
    let t = build_core();
    let conversation = qid("conv-mls");
    let group = GroupId::new("group-a");
    t.core
        .conversations
        .persist_snapshot(&mls_group_snapshot(&conversation, &group))
        .expect("persist");
    t.group.create_group(&group).await.expect("group");
    t.core.sync.update_slow_sync_status(SlowSyncStatus::Complete);
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::Live);

    let join = crate::event::Event {
        id: "ev-join".to_string(),
        payload: crate::event::EventPayload::MemberJoin {
            conversation_id: conversation.clone(),
            from: other_user(),
            members: vec![crate::conversation::MemberSnapshot {
                user_id: qid("third-user"),
                role: crate::conversation::MemberRole::Member,
            }],
            timestamp_ms: 2_000,
        },
    };
    t.core.processor.process(&join).await.expect("join");
    assert_eq!(t.group.epoch(&group).await.expect("epoch"), 0);

    // The queued proposal is committed just before the send.
    t.core
        .send_text_message(&conversation, "after join")
        .await
        .expect("send");
    assert_eq!(t.group.epoch(&group).await.expect("epoch"), 1);

    // No pending proposals: another send leaves the epoch alone.
    t.core
        .send_text_message(&conversation, "steady state")
        .await
        .expect("send");
    assert_eq!(t.group.epoch(&group).await.expect("epoch"), 1);
}

#[tokio::test]
async fn regular_sends_wait_for_incremental_sync_to_be_live() {
    let (t, conversation) = synced_proteus_core().await;
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::Pending);

    let core_sync = t.core.sync.clone();
    let sender = t.core.sender.clone();
    let config = super::test_config();
    let conversation_clone = conversation.clone();
    let send_task = tokio::spawn(async move {
        let message = RegularMessage {
            id: "gated".to_string(),
            conversation_id: conversation_clone,
            sender_user_id: config.self_user_id.clone(),
            sender_client_id: Some(config.self_client_id.clone()),
            timestamp_ms: crate::time::now_ms(),
            status: MessageStatus::Pending,
            edit_status: EditStatus::NotEdited,
            content: MessageContent::Text {
                content: "gated".to_string(),
            },
        };
        sender
            .send_message(crate::message::Message::Regular(message))
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!send_task.is_finished());
    assert!(t.backend.sent_messages().await.is_empty());

    core_sync.update_incremental_sync_status(IncrementalSyncStatus::Live);
    send_task.await.expect("join").expect("send");
    assert_eq!(t.backend.sent_messages().await.len(), 1);
}

#[tokio::test]
async fn inserting_the_same_message_twice_keeps_one_row() {
    let (t, conversation) = synced_proteus_core().await;
    let message = RegularMessage {
        id: "msg-1".to_string(),
        conversation_id: conversation.clone(),
        sender_user_id: other_user(),
        sender_client_id: Some(other_client()),
        timestamp_ms: 1_000,
        status: MessageStatus::Sent,
        edit_status: EditStatus::NotEdited,
        content: MessageContent::Text {
            content: "original".to_string(),
        },
    };
    assert!(t.core.messages.insert(&message).expect("first insert"));

    let mut replay = message.clone();
    replay.content = MessageContent::Text {
        content: "replayed".to_string(),
    };
    assert!(!t.core.messages.insert(&replay).expect("second insert"));

    let messages = t.core.messages.list(&conversation).expect("list");
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].content,
        MessageContent::Text {
            content: "original".to_string()
        }
    );
}
