//! # push-streamer
//!
//! `push-streamer` maintains an eventually-consistent, duplicate-free
//! registration of "who wants what" between broker nodes (which initiate
//! pushes) and gateway nodes (which register interest in logically-typed
//! streams), across a cluster whose membership changes dynamically. Each
//! push is routed to exactly one live consumer among a logically-equivalent
//! group.
//!
//! The cluster transport, membership detection, and payload semantics are
//! collaborators: integrators implement [`ClusterNetwork`] and feed
//! [`MembershipEvent`]s; payloads and stream metadata stay opaque bytes.
//!
//! ## Gateway side
//!
//! [`ClientStreamer`] aggregates equivalent local registrations into one
//! wire registration per logical stream, retries registration toward every
//! known broker until acked, re-registers on broker (re)join, and fans
//! inbound pushes out to one uniformly-random local consumer.
//!
//! ## Broker side
//!
//! [`RemoteStreamRegistry`] indexes remote registrations per stream type for
//! lock-free snapshot reads; [`RemoteStreamer`] resolves a type to a
//! logically-equivalent consumer group and [`RemoteStream::push`] performs a
//! single, non-retried asynchronous push with a caller-supplied error
//! handler.
//!
//! ## Internal architecture map
//!
//! - `cluster`: collaborator seams (network, membership)
//! - `wire`: topics and message shapes
//! - `gateway`: aggregation, registration engine, delivery handlers
//! - `broker`: registry, pick strategy, push path, protocol handlers
//!
//! ## Observability model
//!
//! The crate emits `tracing` events and never installs a global subscriber;
//! binaries and tests own one-time `tracing_subscriber` initialization.

pub mod cluster;
pub use cluster::{ClusterNetwork, MemberId, MembershipEvent, NetworkError, TopicHandler};

mod config;
pub use config::StreamerConfig;

mod error;
pub use error::{DeliveryError, PushError, SinkError, StreamerError};

mod metrics;
pub use metrics::{MetricsSnapshot, StreamMetrics};

pub mod wire;

mod gateway;
pub use gateway::aggregated_stream::{LogicalId, StreamSink};
pub use gateway::api_handler::register_gateway_handlers;
pub use gateway::streamer::ClientStreamer;

mod broker;
pub use broker::api_handler::{announce_restart, register_broker_handlers, run_membership_feed};
pub use broker::picker::{StreamPicker, UniformRandomPicker};
pub use broker::registry::{ConsumerGroup, RemoteStreamRegistry, StreamConsumer, StreamId};
pub use broker::streamer::{RemoteStream, RemoteStreamer};
