//! Broker-side layer.
//!
//! Owns the remote-consumer registry, the per-push target selection policy,
//! and the single-attempt push path. Registry mutation is confined to one
//! writer loop; the type index is published for lock-free snapshot reads from
//! arbitrary request-handling threads.

pub mod api_handler;
pub mod picker;
pub(crate) mod pusher;
pub mod registry;
pub mod streamer;
