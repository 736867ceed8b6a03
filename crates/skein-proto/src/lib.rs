//! Wire types for the generic message envelope.
//!
//! Every end-to-end encrypted payload is a protobuf `GenericMessage`; the
//! structs here are hand-rolled `prost` derives, so the field tags below *are*
//! the wire contract and must never be renumbered.

pub mod messages;

pub use messages::{
    generic_message, receipt, Asset, External, GenericMessage, Knock, LastRead, Reaction, Receipt,
    Text,
};
