use super::{
    build_core, other_client, other_user, proteus_group_snapshot, qid,
    self_conversation_snapshot, self_user,
};
use crate::conversation::ReceiptMode;
use crate::message::{
    EditStatus, MessageContent, MessageStatus, ReceiptKind, RegularMessage,
};
use crate::network::SentMessage;
use crate::sync::{IncrementalSyncStatus, SlowSyncStatus};

async fn synced_core_with_receipts() -> (super::TestCore, crate::ids::ConversationId) {
    let t = build_core();
    let conversation = qid("conv-a");
    let mut snapshot = proteus_group_snapshot(&conversation);
    snapshot.receipt_mode = ReceiptMode::Enabled;
    t.core
        .conversations
        .persist_snapshot(&snapshot)
        .expect("persist");
    t.core
        .conversations
        .persist_snapshot(&self_conversation_snapshot(&qid("self-conv")))
        .expect("persist self conversation");
    t.core.sync.update_slow_sync_status(SlowSyncStatus::Complete);
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::Live);
    (t, conversation)
}

fn inbound_message(conversation: &crate::ids::ConversationId, id: &str, at_ms: u64) -> RegularMessage {
    RegularMessage {
        id: id.to_string(),
        conversation_id: conversation.clone(),
        sender_user_id: other_user(),
        sender_client_id: Some(other_client()),
        timestamp_ms: at_ms,
        status: MessageStatus::Sent,
        edit_status: EditStatus::NotEdited,
        content: MessageContent::Text {
            content: "inbound".to_string(),
        },
    }
}

#[tokio::test]
async fn advances_the_read_date_and_fans_out_the_marker() {
    let (t, conversation) = synced_core_with_receipts().await;
    t.core
        .messages
        .insert(&inbound_message(&conversation, "msg-1", 100))
        .expect("insert");

    t.core
        .update_conversation_read_date(&conversation, 200)
        .await
        .expect("update");

    assert_eq!(
        t.core.conversations.require(&conversation).expect("get").last_read_ms,
        200
    );

    let sent = t.backend.sent_messages().await;
    assert_eq!(sent.len(), 2);
    // First the read confirmation into the conversation itself, then the
    // read marker into the self conversation for our other clients.
    match &sent[0] {
        SentMessage::Pairwise {
            conversation: target,
            ..
        } => assert_eq!(target, &conversation),
        other => panic!("expected pairwise send, got {:?}", other),
    }
    match &sent[1] {
        SentMessage::Pairwise {
            conversation: target,
            ..
        } => assert_eq!(target, &qid("self-conv")),
        other => panic!("expected pairwise send, got {:?}", other),
    }
}

#[tokio::test]
async fn only_unread_messages_from_others_are_confirmed() {
    let (t, conversation) = synced_core_with_receipts().await;
    // Already covered by a previous read marker.
    t.core
        .messages
        .insert(&inbound_message(&conversation, "msg-old", 50))
        .expect("insert");
    t.core
        .conversations
        .update_read_date(&conversation, 60)
        .expect("pre-read");
    // Newly read.
    t.core
        .messages
        .insert(&inbound_message(&conversation, "msg-new", 100))
        .expect("insert");
    // Our own message never gets a confirmation.
    t.core
        .messages
        .insert(&RegularMessage {
            id: "msg-mine".to_string(),
            conversation_id: conversation.clone(),
            sender_user_id: self_user(),
            sender_client_id: None,
            timestamp_ms: 110,
            status: MessageStatus::Sent,
            edit_status: EditStatus::NotEdited,
            content: MessageContent::Text {
                content: "mine".to_string(),
            },
        })
        .expect("insert");

    t.core
        .update_conversation_read_date(&conversation, 200)
        .await
        .expect("update");

    let sent = t.backend.sent_messages().await;
    let confirmation_targets: Vec<&SentMessage> = sent
        .iter()
        .filter(|s| matches!(s, SentMessage::Pairwise { conversation: c, .. } if c == &conversation))
        .collect();
    assert_eq!(confirmation_targets.len(), 1);
}

#[tokio::test]
async fn receipt_disabled_conversations_send_no_confirmation() {
    let t = build_core();
    let conversation = qid("conv-a");
    t.core
        .conversations
        .persist_snapshot(&proteus_group_snapshot(&conversation))
        .expect("persist");
    t.core.sync.update_slow_sync_status(SlowSyncStatus::Complete);
    t.core
        .sync
        .update_incremental_sync_status(IncrementalSyncStatus::Live);
    t.core
        .messages
        .insert(&inbound_message(&conversation, "msg-1", 100))
        .expect("insert");

    t.core
        .update_conversation_read_date(&conversation, 200)
        .await
        .expect("update");

    // No self conversation is known either, so nothing at all goes out.
    assert!(t.backend.sent_messages().await.is_empty());
    assert_eq!(
        t.core.conversations.require(&conversation).expect("get").last_read_ms,
        200
    );
}

#[tokio::test]
async fn read_date_never_moves_backwards() {
    let (t, conversation) = synced_core_with_receipts().await;
    t.core
        .update_conversation_read_date(&conversation, 500)
        .await
        .expect("forward");
    t.core
        .update_conversation_read_date(&conversation, 300)
        .await
        .expect("stale update");

    assert_eq!(
        t.core.conversations.require(&conversation).expect("get").last_read_ms,
        500
    );
}

#[tokio::test]
async fn confirmation_content_lists_the_confirmed_messages() {
    let (t, conversation) = synced_core_with_receipts().await;
    t.core
        .conversations
        .set_member_clients(&conversation, &other_user(), vec![other_client()])
        .expect("clients");
    t.core
        .messages
        .insert(&inbound_message(&conversation, "msg-1", 100))
        .expect("insert");

    t.core
        .update_conversation_read_date(&conversation, 200)
        .await
        .expect("update");

    let sent = t.backend.sent_messages().await;
    let envelope = match &sent[0] {
        SentMessage::Pairwise { recipients, .. } => &recipients[0],
        other => panic!("expected pairwise send, got {:?}", other),
    };
    // The fake provider's ciphertext is prefix + plaintext; peel it and
    // decode the envelope to check what was confirmed.
    let plaintext = envelope
        .ciphertext
        .strip_prefix(b"pairwise:".as_slice())
        .expect("fake ciphertext framing");
    let decoded = crate::codec::decode_from_protobuf(plaintext, true).expect("decode");
    match decoded {
        crate::codec::ProtoContent::Readable {
            content: MessageContent::Receipt { kind, message_ids },
            ..
        } => {
            assert_eq!(kind, ReceiptKind::Read);
            assert_eq!(message_ids, vec!["msg-1".to_string()]);
        }
        other => panic!("expected receipt content, got {:?}", other),
    }
}
