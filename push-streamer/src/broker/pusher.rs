//! Single-attempt asynchronous push of one payload to one gateway.

use crate::broker::registry::StreamId;
use crate::cluster::ClusterNetwork;
use crate::error::PushError;
use crate::metrics::StreamMetrics;
use crate::wire::{topics, PushStreamRequest, StreamResponse, WireMessage};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct RemoteStreamPusher {
    network: Arc<dyn ClusterNetwork>,
    metrics: Arc<StreamMetrics>,
    push_timeout: Duration,
}

impl RemoteStreamPusher {
    pub(crate) fn new(
        network: Arc<dyn ClusterNetwork>,
        metrics: Arc<StreamMetrics>,
        push_timeout: Duration,
    ) -> Self {
        Self {
            network,
            metrics,
            push_timeout,
        }
    }

    /// One push attempt. No retry lives here; the outcome is recorded in the
    /// metrics and returned exactly once.
    pub(crate) async fn push(&self, target: &StreamId, payload: Bytes) -> Result<(), PushError> {
        let outcome = self.attempt(target, payload).await;
        match &outcome {
            Ok(()) => self.metrics.push_succeeded(),
            Err(_) => self.metrics.push_failed(),
        }
        outcome
    }

    async fn attempt(&self, target: &StreamId, payload: Bytes) -> Result<(), PushError> {
        let request = PushStreamRequest {
            stream_id: target.stream_id,
            payload,
        };
        let response = self
            .network
            .send(
                topics::PUSH_STREAM,
                request.encode()?,
                &target.receiver,
                self.push_timeout,
            )
            .await?;

        match StreamResponse::decode(&response)? {
            StreamResponse::Push => Ok(()),
            StreamResponse::Error(error) => Err(PushError::Rejected(error)),
        }
    }
}
