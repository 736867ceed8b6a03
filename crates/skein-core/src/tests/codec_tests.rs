use super::qid;
use crate::codec::{decode_from_protobuf, decrypt_external, encode_to_protobuf, encrypt_external, ProtoContent};
use crate::error::CoreError;
use crate::message::{MessageContent, ReceiptKind};
use prost::Message as _;
use skein_proto::GenericMessage;
use std::collections::BTreeSet;

fn readable(content: MessageContent) -> ProtoContent {
    ProtoContent::Readable {
        message_id: "message-id".to_string(),
        content,
        is_self_message: false,
    }
}

fn assert_round_trips(content: ProtoContent) {
    let encoded = encode_to_protobuf(&content).expect("encode");
    let decoded = decode_from_protobuf(&encoded, false).expect("decode");
    assert_eq!(content, decoded);
}

#[test]
fn text_round_trips() {
    assert_round_trips(readable(MessageContent::Text {
        content: "hello there".to_string(),
    }));
}

#[test]
fn knock_round_trips() {
    assert_round_trips(readable(MessageContent::Knock { hot_knock: true }));
    assert_round_trips(readable(MessageContent::Knock { hot_knock: false }));
}

#[test]
fn reaction_round_trips() {
    let emoji_set: BTreeSet<String> = ["❤️", "👍"].iter().map(|s| s.to_string()).collect();
    assert_round_trips(readable(MessageContent::Reaction {
        message_id: "target".to_string(),
        emoji_set,
    }));
}

#[test]
fn empty_reaction_round_trips() {
    assert_round_trips(readable(MessageContent::Reaction {
        message_id: "target".to_string(),
        emoji_set: BTreeSet::new(),
    }));
}

#[test]
fn last_read_round_trips() {
    assert_round_trips(readable(MessageContent::LastRead {
        conversation_id: qid("conversation"),
        time_ms: 1_700_000_000_000,
    }));
}

#[test]
fn receipt_round_trips() {
    assert_round_trips(readable(MessageContent::Receipt {
        kind: ReceiptKind::Read,
        message_ids: vec!["a".to_string(), "b".to_string()],
    }));
    assert_round_trips(readable(MessageContent::Receipt {
        kind: ReceiptKind::Delivered,
        message_ids: vec!["c".to_string()],
    }));
}

#[test]
fn asset_round_trips() {
    assert_round_trips(readable(MessageContent::Asset {
        name: "photo.jpg".to_string(),
        mime_type: "image/jpeg".to_string(),
        size_bytes: 48_213,
        asset_id: "asset-id".to_string(),
        asset_domain: "assets.example.com".to_string(),
        asset_token: "token".to_string(),
        otr_key: vec![1, 2, 3],
        sha256: vec![4, 5, 6],
    }));
}

#[test]
fn external_instructions_round_trip() {
    assert_round_trips(ProtoContent::ExternalInstructions {
        message_id: "message-id".to_string(),
        otr_key: vec![9; 32],
        sha256: Some(vec![7; 32]),
    });
}

#[test]
fn unrecognized_content_is_preserved_verbatim() {
    // An envelope with no content variant we know: only the message id.
    let envelope = GenericMessage {
        message_id: "from-the-future".to_string(),
        content: None,
    };
    let bytes = envelope.encode_to_vec();

    let decoded = decode_from_protobuf(&bytes, false).expect("decode");
    match &decoded {
        ProtoContent::Readable {
            message_id,
            content: MessageContent::Unknown { encoded },
            ..
        } => {
            assert_eq!(message_id, "from-the-future");
            assert_eq!(encoded, &bytes);
        }
        other => panic!("expected unknown content, got {:?}", other),
    }

    // Re-encoding reproduces the original bytes untouched.
    let reencoded = encode_to_protobuf(&decoded).expect("encode");
    assert_eq!(reencoded, bytes);
}

#[test]
fn system_content_has_no_wire_form() {
    let result = encode_to_protobuf(&readable(MessageContent::ReceiptModeChanged {
        enabled: true,
    }));
    assert!(matches!(result, Err(CoreError::Unknown(_))));
}

#[test]
fn external_payload_round_trips_through_aes() {
    let inner = readable(MessageContent::Text {
        content: "big payload".to_string(),
    });
    let (key, blob) = encrypt_external(&inner).expect("encrypt");

    let decoded = decrypt_external(&key, &blob, false).expect("decrypt");
    assert_eq!(inner, decoded);
}

#[test]
fn external_payload_rejects_wrong_key() {
    let inner = readable(MessageContent::Text {
        content: "big payload".to_string(),
    });
    let (_, blob) = encrypt_external(&inner).expect("encrypt");

    let result = decrypt_external(&[0u8; 32], &blob, false);
    assert!(matches!(result, Err(CoreError::Crypto(_))));
}
