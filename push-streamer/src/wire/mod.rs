//! Wire protocol shared by both sides: topic names and message shapes.
//!
//! Payload and metadata fields stay opaque byte strings end to end; the core
//! never branches on their contents.

mod messages;
pub mod topics;

pub use messages::{
    AddStreamRequest, ErrorCode, ErrorResponse, PushStreamRequest, RemoveAllRequest,
    RemoveStreamRequest, RestartStreamsRequest, StreamResponse, WireError, WireMessage,
};
