//! Gateway-side layer.
//!
//! Owns the local stream registry (aggregation of equivalent registrations),
//! the per-broker registration engine with indefinite retry, and the inbound
//! push delivery path. All registry state is confined to one command loop;
//! callers only ever hold the [`streamer::ClientStreamer`] handle.

pub(crate) mod aggregated_stream;
pub mod api_handler;
pub(crate) mod engine;
mod registration;
pub mod streamer;
