//! Crate-level error types for registration, delivery, and push paths.

use crate::cluster::NetworkError;
use crate::wire::{ErrorResponse, WireError};
use thiserror::Error;
use uuid::Uuid;

/// Outcome a consumer callback reports back for one delivered payload.
///
/// `Blocked` and `Exhausted` are backpressure signals the broker side can act
/// on; anything else travels as an internal failure with its cause chain.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("consumer is applying backpressure")]
    Blocked,
    #[error("consumer capacity exhausted")]
    Exhausted,
    #[error("consumer failed: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Failure of one local delivery attempt at the gateway.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no client stream registered under {0}")]
    NoSuchStream(Uuid),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("client stream engine is not running")]
    EngineStopped,
}

/// Failure of a single broker-side push attempt. Never retried by this crate;
/// the caller-supplied error handler receives it together with the payload.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("no live consumer available for push")]
    NoTarget,
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("gateway rejected push: {0}")]
    Rejected(ErrorResponse),
}

/// Failure of an operation on one of the registry engines.
#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("stream engine is not running")]
    EngineStopped,
    #[error("no client stream registered under id {0}")]
    UnknownStream(Uuid),
}

/// Flattens an error and its `source()` chain into detail strings, outermost
/// cause first.
pub(crate) fn cause_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut details = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        details.push(cause.to_string());
        current = cause.source();
    }
    details
}
