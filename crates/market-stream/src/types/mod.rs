/*
[INPUT]:  Feed schema definitions and serde requirements
[OUTPUT]: Typed Rust structs/enums for every streamed channel
[POS]:    Data layer - type definitions for streamed messages
[UPDATE]: When a feed schema changes or new message kinds are added
*/

pub mod clob;
pub mod enums;
pub mod live_data;
pub(crate) mod serde_helpers;

pub use clob::*;
pub use enums::*;
pub use live_data::*;

/// A message whose kind this crate does not model, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessage {
    /// The discriminating field value (`event_type`, or `topic/type` on live data)
    pub kind: String,
    /// The object as received, re-serialized
    pub raw: String,
}
