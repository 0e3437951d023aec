//! Seams toward the external cluster layer: point-to-point messaging by topic
//! and the membership-change feed.
//!
//! Everything here is a collaborator contract. The crate never opens sockets
//! itself; integrators hand in an implementation of [`ClusterNetwork`] and a
//! [`MembershipEvent`] feed, and all registration/push traffic flows through
//! them.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Identity of one cluster node, broker or gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Membership change delivered by the external cluster layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    MemberJoined(MemberId),
    MemberRemoved(MemberId),
}

/// Failure surfaced by the network collaborator.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request on topic {topic} to {target} timed out")]
    Timeout { topic: String, target: MemberId },
    #[error("member {0} is unreachable")]
    Unreachable(MemberId),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Handler invoked for inbound messages on one subscribed topic.
///
/// For request/response topics the returned bytes travel back to the sender;
/// for fire-and-forget topics the return value is discarded.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn on_request(&self, sender: MemberId, request: Bytes) -> Result<Bytes, NetworkError>;
}

/// Reliable point-to-point messaging by named topic.
///
/// `send` is request/response with a bounded timeout; `unicast` is
/// fire-and-forget. Implementations must never block the caller on I/O.
#[async_trait]
pub trait ClusterNetwork: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        request: Bytes,
        target: &MemberId,
        timeout: Duration,
    ) -> Result<Bytes, NetworkError>;

    async fn subscribe(
        &self,
        topic: &str,
        handler: std::sync::Arc<dyn TopicHandler>,
    ) -> Result<(), NetworkError>;

    async fn unicast(
        &self,
        topic: &str,
        message: Bytes,
        target: &MemberId,
        reliable: bool,
    ) -> Result<(), NetworkError>;
}
