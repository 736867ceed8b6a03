use crate::error::{CoreError, CryptoFailure};
use crate::ids::QualifiedId;
use crate::message::{MessageContent, ReceiptKind};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use prost::Message as _;
use rand::RngCore;
use skein_proto::{generic_message, receipt, GenericMessage};
use std::collections::BTreeSet;

const NONCE_LEN: usize = 12;

/// What a decrypted envelope turned out to be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtoContent {
    /// A payload we can act on directly.
    Readable {
        message_id: String,
        content: MessageContent,
        is_self_message: bool,
    },
    /// Key material for a larger payload carried out-of-band next to the
    /// envelope; the real content is obtained via [`decrypt_external`].
    ExternalInstructions {
        message_id: String,
        otr_key: Vec<u8>,
        sha256: Option<Vec<u8>>,
    },
}

impl ProtoContent {
    pub fn message_id(&self) -> &str {
        match self {
            ProtoContent::Readable { message_id, .. } => message_id,
            ProtoContent::ExternalInstructions { message_id, .. } => message_id,
        }
    }
}

/// Decodes a decrypted plaintext blob into domain content.
///
/// `is_self_message` is transport-level knowledge (whether the sender is our
/// own user) and is stamped onto the result rather than read from the wire.
pub fn decode_from_protobuf(bytes: &[u8], is_self_message: bool) -> Result<ProtoContent, CoreError> {
    let envelope = GenericMessage::decode(bytes)
        .map_err(|e| CoreError::Unknown(format!("undecodable envelope: {}", e)))?;
    let message_id = envelope.message_id.clone();
    let content = match envelope.content {
        None => {
            // Content from a newer protocol revision than ours: keep the raw
            // bytes so re-encoding reproduces them untouched.
            return Ok(ProtoContent::Readable {
                message_id,
                content: MessageContent::Unknown {
                    encoded: bytes.to_vec(),
                },
                is_self_message,
            });
        }
        Some(content) => content,
    };
    let content = match content {
        generic_message::Content::External(external) => {
            return Ok(ProtoContent::ExternalInstructions {
                message_id,
                otr_key: external.otr_key,
                sha256: external.sha256,
            });
        }
        generic_message::Content::Text(text) => MessageContent::Text {
            content: text.content,
        },
        generic_message::Content::Knock(knock) => MessageContent::Knock {
            hot_knock: knock.hot_knock,
        },
        generic_message::Content::Reaction(reaction) => MessageContent::Reaction {
            message_id: reaction.message_id,
            emoji_set: split_emoji(&reaction.emoji),
        },
        generic_message::Content::LastRead(last_read) => {
            if last_read.conversation_id.is_empty() {
                return Err(CoreError::Unknown(
                    "last-read marker without a conversation".to_string(),
                ));
            }
            MessageContent::LastRead {
                conversation_id: QualifiedId::new(
                    last_read.conversation_id,
                    last_read.conversation_domain,
                ),
                time_ms: last_read.last_read_timestamp_ms.max(0) as u64,
            }
        }
        generic_message::Content::Receipt(rec) => MessageContent::Receipt {
            kind: match receipt::Kind::try_from(rec.kind) {
                Ok(receipt::Kind::Read) => ReceiptKind::Read,
                _ => ReceiptKind::Delivered,
            },
            message_ids: rec.message_ids,
        },
        generic_message::Content::Asset(asset) => MessageContent::Asset {
            name: asset.name,
            mime_type: asset.mime_type,
            size_bytes: asset.size_bytes,
            asset_id: asset.asset_id,
            asset_domain: asset.asset_domain,
            asset_token: asset.asset_token,
            otr_key: asset.otr_key,
            sha256: asset.sha256,
        },
    };
    Ok(ProtoContent::Readable {
        message_id,
        content,
        is_self_message,
    })
}

pub fn encode_to_protobuf(content: &ProtoContent) -> Result<Vec<u8>, CoreError> {
    let (message_id, payload) = match content {
        ProtoContent::ExternalInstructions {
            message_id,
            otr_key,
            sha256,
        } => (
            message_id.clone(),
            generic_message::Content::External(skein_proto::External {
                otr_key: otr_key.clone(),
                sha256: sha256.clone(),
            }),
        ),
        ProtoContent::Readable {
            message_id,
            content,
            ..
        } => {
            let payload = match content {
                MessageContent::Unknown { encoded } => return Ok(encoded.clone()),
                MessageContent::Text { content } => {
                    generic_message::Content::Text(skein_proto::Text {
                        content: content.clone(),
                    })
                }
                MessageContent::Knock { hot_knock } => {
                    generic_message::Content::Knock(skein_proto::Knock {
                        hot_knock: *hot_knock,
                    })
                }
                MessageContent::Reaction {
                    message_id,
                    emoji_set,
                } => generic_message::Content::Reaction(skein_proto::Reaction {
                    emoji: join_emoji(emoji_set),
                    message_id: message_id.clone(),
                }),
                MessageContent::LastRead {
                    conversation_id,
                    time_ms,
                } => generic_message::Content::LastRead(skein_proto::LastRead {
                    conversation_id: conversation_id.value.clone(),
                    conversation_domain: conversation_id.domain.clone(),
                    last_read_timestamp_ms: *time_ms as i64,
                }),
                MessageContent::Receipt { kind, message_ids } => {
                    generic_message::Content::Receipt(skein_proto::Receipt {
                        kind: match kind {
                            ReceiptKind::Delivered => receipt::Kind::Delivered as i32,
                            ReceiptKind::Read => receipt::Kind::Read as i32,
                        },
                        message_ids: message_ids.clone(),
                    })
                }
                MessageContent::Asset {
                    name,
                    mime_type,
                    size_bytes,
                    asset_id,
                    asset_domain,
                    asset_token,
                    otr_key,
                    sha256,
                } => generic_message::Content::Asset(skein_proto::Asset {
                    name: name.clone(),
                    mime_type: mime_type.clone(),
                    size_bytes: *size_bytes,
                    asset_id: asset_id.clone(),
                    asset_domain: asset_domain.clone(),
                    asset_token: asset_token.clone(),
                    otr_key: otr_key.clone(),
                    sha256: sha256.clone(),
                }),
                MessageContent::MemberChange { .. }
                | MessageContent::ReceiptModeChanged { .. } => {
                    // Local system messages have no wire form.
                    return Err(CoreError::Unknown(
                        "system content cannot be encoded for the wire".to_string(),
                    ));
                }
            };
            (message_id.clone(), payload)
        }
    };
    let envelope = GenericMessage {
        message_id,
        content: Some(payload),
    };
    Ok(envelope.encode_to_vec())
}

/// Decrypts the out-of-band blob referenced by external instructions and
/// decodes the real content from it. The blob is AES-256-GCM with the nonce
/// prepended.
pub fn decrypt_external(
    otr_key: &[u8],
    blob: &[u8],
    is_self_message: bool,
) -> Result<ProtoContent, CoreError> {
    if blob.len() < NONCE_LEN {
        return Err(CryptoFailure::Provider("external payload too short".to_string()).into());
    }
    let cipher = Aes256Gcm::new_from_slice(otr_key)
        .map_err(|_| CryptoFailure::Provider("invalid external payload key".to_string()))?;
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let plaintext = cipher
        .decrypt(nonce, &blob[NONCE_LEN..])
        .map_err(|_| CryptoFailure::Provider("external payload decryption failed".to_string()))?;
    match decode_from_protobuf(&plaintext, is_self_message)? {
        content @ ProtoContent::Readable { .. } => Ok(content),
        ProtoContent::ExternalInstructions { .. } => Err(CoreError::Unknown(
            "external payload pointed at another external payload".to_string(),
        )),
    }
}

/// Encrypts a payload for out-of-band transport; inverse of
/// [`decrypt_external`]. Returns the fresh key and the nonce-prefixed blob.
pub fn encrypt_external(content: &ProtoContent) -> Result<(Vec<u8>, Vec<u8>), CoreError> {
    let plaintext = encode_to_protobuf(content)?;
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| CryptoFailure::Provider("invalid external payload key".to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| CryptoFailure::Provider("external payload encryption failed".to_string()))?;
    let mut blob = nonce_bytes.to_vec();
    blob.extend_from_slice(&ciphertext);
    Ok((key, blob))
}

fn split_emoji(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_emoji(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(",")
}
