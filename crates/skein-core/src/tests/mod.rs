pub mod codec_tests;
pub mod reaction_tests;
pub mod read_receipt_tests;
pub mod sender_tests;
pub mod slow_sync_tests;

use crate::codec::{self, ProtoContent};
use crate::config::CoreConfig;
use crate::conversation::{
    Access, AccessRole, ConversationSnapshot, ConversationType, MemberRole, MemberSnapshot,
    ProtocolInfo, ReceiptMode,
};
use crate::crypto::{InMemoryGroupProvider, InMemoryPairwiseProvider};
use crate::event::{Event, EventPayload, NewMessageEvent};
use crate::ids::{ClientId, ConversationId, GroupId, QualifiedId, UserId};
use crate::message::MessageContent;
use crate::network::InMemoryBackend;
use crate::store::InMemoryStore;
use crate::sync::SyncCriteria;
use crate::Core;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const TEST_DOMAIN: &str = "example.com";

pub fn qid(value: &str) -> QualifiedId {
    QualifiedId::new(value, TEST_DOMAIN)
}

pub fn self_user() -> UserId {
    qid("self-user")
}

pub fn self_client() -> ClientId {
    ClientId::new("self-client")
}

pub fn other_user() -> UserId {
    qid("other-user")
}

pub fn other_client() -> ClientId {
    ClientId::new("other-client")
}

pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::new(self_user(), self_client());
    config.slow_sync_retry_delay_ms = 50;
    config
}

pub struct TestCore {
    pub core: Core,
    pub backend: Arc<InMemoryBackend>,
    pub pairwise: Arc<InMemoryPairwiseProvider>,
    pub group: Arc<InMemoryGroupProvider>,
    pub criteria_tx: watch::Sender<SyncCriteria>,
}

pub fn build_core() -> TestCore {
    build_core_with_config(test_config())
}

pub fn build_core_with_config(config: CoreConfig) -> TestCore {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let backend = Arc::new(InMemoryBackend::new());
    let pairwise = Arc::new(InMemoryPairwiseProvider::new());
    let group = Arc::new(InMemoryGroupProvider::new());
    let (criteria_tx, criteria_rx) = watch::channel(SyncCriteria::MissingRequirement(
        "client not registered".to_string(),
    ));
    let core = Core::new(
        config,
        Arc::new(InMemoryStore::new()),
        backend.clone(),
        pairwise.clone(),
        group.clone(),
        criteria_rx,
    )
    .expect("core");
    TestCore {
        core,
        backend,
        pairwise,
        group,
        criteria_tx,
    }
}

pub fn proteus_group_snapshot(id: &ConversationId) -> ConversationSnapshot {
    ConversationSnapshot {
        id: id.clone(),
        name: Some("test group".to_string()),
        conversation_type: ConversationType::Group,
        team_id: None,
        protocol: ProtocolInfo::Proteus,
        access: vec![Access::InviteOnly],
        access_roles: vec![AccessRole::TeamMember, AccessRole::Guest],
        receipt_mode: ReceiptMode::Disabled,
        creator_id: Some(other_user()),
        members: vec![
            MemberSnapshot {
                user_id: self_user(),
                role: MemberRole::Admin,
            },
            MemberSnapshot {
                user_id: other_user(),
                role: MemberRole::Member,
            },
        ],
    }
}

pub fn mls_group_snapshot(id: &ConversationId, group_id: &GroupId) -> ConversationSnapshot {
    let mut snapshot = proteus_group_snapshot(id);
    snapshot.protocol = ProtocolInfo::Mls {
        group_id: group_id.clone(),
        epoch: 0,
        cipher_suite: 1,
    };
    snapshot
}

pub fn self_conversation_snapshot(id: &ConversationId) -> ConversationSnapshot {
    ConversationSnapshot {
        id: id.clone(),
        name: None,
        conversation_type: ConversationType::SelfConversation,
        team_id: None,
        protocol: ProtocolInfo::Proteus,
        access: vec![Access::InviteOnly],
        access_roles: Vec::new(),
        receipt_mode: ReceiptMode::Disabled,
        creator_id: Some(self_user()),
        members: vec![MemberSnapshot {
            user_id: self_user(),
            role: MemberRole::Admin,
        }],
    }
}

/// Base64 ciphertext the in-memory pairwise provider will decrypt.
pub fn pairwise_ciphertext(payload: &[u8]) -> String {
    let mut raw = b"pairwise:".to_vec();
    raw.extend_from_slice(payload);
    STANDARD.encode(raw)
}

/// Ciphertext the in-memory group provider will decrypt.
pub fn group_ciphertext(payload: &[u8]) -> Vec<u8> {
    let mut raw = b"group:".to_vec();
    raw.extend_from_slice(payload);
    raw
}

pub fn encoded_text(message_id: &str, text: &str) -> Vec<u8> {
    codec::encode_to_protobuf(&ProtoContent::Readable {
        message_id: message_id.to_string(),
        content: MessageContent::Text {
            content: text.to_string(),
        },
        is_self_message: false,
    })
    .expect("encode")
}

pub fn text_message_event(
    event_id: &str,
    conversation_id: &ConversationId,
    sender: &UserId,
    sender_client: &ClientId,
    message_id: &str,
    text: &str,
    timestamp_ms: u64,
) -> Event {
    Event {
        id: event_id.to_string(),
        payload: EventPayload::NewMessage(NewMessageEvent {
            conversation_id: conversation_id.clone(),
            sender_user_id: sender.clone(),
            sender_client_id: sender_client.clone(),
            ciphertext: pairwise_ciphertext(&encoded_text(message_id, text)),
            external_blob: None,
            timestamp_ms,
        }),
    }
}

pub fn signaling_event(
    event_id: &str,
    conversation_id: &ConversationId,
    sender: &UserId,
    sender_client: &ClientId,
    content: MessageContent,
) -> Event {
    let payload = codec::encode_to_protobuf(&ProtoContent::Readable {
        message_id: format!("{}-signal", event_id),
        content,
        is_self_message: false,
    })
    .expect("encode");
    Event {
        id: event_id.to_string(),
        payload: EventPayload::NewMessage(NewMessageEvent {
            conversation_id: conversation_id.clone(),
            sender_user_id: sender.clone(),
            sender_client_id: sender_client.clone(),
            ciphertext: pairwise_ciphertext(&payload),
            external_blob: None,
            timestamp_ms: crate::time::now_ms(),
        }),
    }
}

/// A fresh unpacker over the harness's repositories and providers.
pub fn unpacker(t: &TestCore) -> crate::unpack::MessageUnpacker {
    crate::unpack::MessageUnpacker::new(
        t.core.conversations.clone(),
        t.pairwise.clone(),
        t.group.clone(),
        self_user(),
    )
}

/// Waits for a watch stream to satisfy a predicate, failing the test after
/// five seconds.
pub async fn wait_for_status<T, F>(rx: &mut watch::Receiver<T>, predicate: F)
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for status")
        .expect("status stream closed");
}

/// Polls a condition until it holds, failing the test after five seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for condition");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
