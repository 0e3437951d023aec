//! Message shapes carried over the cluster topics.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Codec failure at the wire boundary.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unable to encode {message}: {source}")]
    Encode {
        message: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to decode {message}: {source}")]
    Decode {
        message: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Serialization capability implemented per concrete message type.
pub trait WireMessage: Serialize + DeserializeOwned {
    const NAME: &'static str;

    fn encode(&self) -> Result<Bytes, WireError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|source| WireError::Encode {
                message: Self::NAME,
                source,
            })
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(|source| WireError::Decode {
            message: Self::NAME,
            source,
        })
    }
}

/// Registers interest of one gateway in a logical stream. Duplicate requests
/// for the same (stream_id, sender) pair are idempotent on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddStreamRequest {
    pub stream_id: Uuid,
    pub stream_type: Bytes,
    pub metadata: Bytes,
}

impl WireMessage for AddStreamRequest {
    const NAME: &'static str = "AddStreamRequest";
}

/// Withdraws one registration. Tolerated by the broker when already absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveStreamRequest {
    pub stream_id: Uuid,
}

impl WireMessage for RemoveStreamRequest {
    const NAME: &'static str = "RemoveStreamRequest";
}

/// Shutdown signal: drop every registration of the sending gateway. Sent
/// fire-and-forget, no response awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAllRequest;

impl WireMessage for RemoveAllRequest {
    const NAME: &'static str = "RemoveAllRequest";
}

/// Broker-to-gateway signal that the sender lost its registry contents and
/// every stream must be re-registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartStreamsRequest;

impl WireMessage for RestartStreamsRequest {
    const NAME: &'static str = "RestartStreamsRequest";
}

/// One payload delivery bound to a registered stream id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushStreamRequest {
    pub stream_id: Uuid,
    pub payload: Bytes,
}

impl WireMessage for PushStreamRequest {
    const NAME: &'static str = "PushStreamRequest";
}

/// Closed taxonomy for delivery failures crossing the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Blocked,
    NotFound,
    Exhausted,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Blocked => "BLOCKED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Exhausted => "EXHAUSTED",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

/// Structured delivery failure, with nested causes flattened into `details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub details: Vec<String>,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Gateway response to one push attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamResponse {
    Push,
    Error(ErrorResponse),
}

impl WireMessage for StreamResponse {
    const NAME: &'static str = "StreamResponse";
}
