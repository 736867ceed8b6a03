/// Envelope around every user-visible or signaling payload.
///
/// `message_id` is the client-generated UUID used for deduplication on the
/// receiving side. Exactly one content variant is expected; an absent content
/// means the sender speaks a newer protocol revision than we do.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenericMessage {
    #[prost(string, tag = "1")]
    pub message_id: ::prost::alloc::string::String,
    #[prost(oneof = "generic_message::Content", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub content: ::core::option::Option<generic_message::Content>,
}

pub mod generic_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Content {
        #[prost(message, tag = "2")]
        Text(super::Text),
        #[prost(message, tag = "3")]
        Knock(super::Knock),
        #[prost(message, tag = "4")]
        Reaction(super::Reaction),
        #[prost(message, tag = "5")]
        LastRead(super::LastRead),
        #[prost(message, tag = "6")]
        Receipt(super::Receipt),
        #[prost(message, tag = "7")]
        External(super::External),
        #[prost(message, tag = "8")]
        Asset(super::Asset),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Text {
    #[prost(string, tag = "1")]
    pub content: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Knock {
    #[prost(bool, tag = "1")]
    pub hot_knock: bool,
}

/// The full reaction set of the sender for one message. An empty `emoji`
/// string clears all reactions from that sender.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reaction {
    #[prost(string, tag = "1")]
    pub emoji: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message_id: ::prost::alloc::string::String,
}

/// Read-marker broadcast to the sender's own other clients.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LastRead {
    #[prost(string, tag = "1")]
    pub conversation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub conversation_domain: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub last_read_timestamp_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Receipt {
    #[prost(enumeration = "receipt::Kind", tag = "1")]
    pub kind: i32,
    #[prost(string, repeated, tag = "2")]
    pub message_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

pub mod receipt {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Kind {
        Delivered = 0,
        Read = 1,
    }
}

/// Pointer to an out-of-band payload too large for the envelope itself.
/// The actual content travels next to the event as an AES-256 encrypted blob;
/// `otr_key` is the symmetric key, `sha256` an optional integrity check.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct External {
    #[prost(bytes = "vec", tag = "1")]
    pub otr_key: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub sha256: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Asset {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub mime_type: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub size_bytes: u64,
    #[prost(string, tag = "4")]
    pub asset_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub asset_domain: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub asset_token: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "7")]
    pub otr_key: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub sha256: ::prost::alloc::vec::Vec<u8>,
}
