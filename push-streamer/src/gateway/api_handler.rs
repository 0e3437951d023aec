//! Protocol adapters on the gateway side: inbound push delivery and the
//! broker-restart signal.

use crate::cluster::{ClusterNetwork, MemberId, NetworkError, TopicHandler};
use crate::error::{cause_chain, DeliveryError, SinkError};
use crate::gateway::streamer::ClientStreamer;
use crate::wire::{
    topics, ErrorCode, ErrorResponse, PushStreamRequest, RestartStreamsRequest, StreamResponse,
    WireMessage,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

const COMPONENT: &str = "gateway_api";

/// Subscribes the gateway-side handlers on their topics.
pub async fn register_gateway_handlers(
    network: &Arc<dyn ClusterNetwork>,
    streamer: ClientStreamer,
) -> Result<(), NetworkError> {
    network
        .subscribe(
            topics::PUSH_STREAM,
            Arc::new(PushStreamHandler {
                streamer: streamer.clone(),
            }),
        )
        .await?;
    network
        .subscribe(
            topics::RESTART_STREAMS,
            Arc::new(RestartStreamsHandler { streamer }),
        )
        .await?;
    Ok(())
}

struct PushStreamHandler {
    streamer: ClientStreamer,
}

impl PushStreamHandler {
    async fn deliver(&self, push: PushStreamRequest) -> Result<(), DeliveryError> {
        let sink = self.streamer.resolve_delivery(push.stream_id).await?;
        sink.accept(push.payload).await?;
        Ok(())
    }
}

#[async_trait]
impl TopicHandler for PushStreamHandler {
    async fn on_request(&self, sender: MemberId, request: Bytes) -> Result<Bytes, NetworkError> {
        let response = match PushStreamRequest::decode(&request) {
            Ok(push) => match self.deliver(push).await {
                Ok(()) => StreamResponse::Push,
                Err(error) => {
                    debug!(
                        component = COMPONENT,
                        broker = %sender,
                        error = %error,
                        "push delivery failed"
                    );
                    StreamResponse::Error(error_response(&error))
                }
            },
            Err(error) => {
                warn!(component = COMPONENT, broker = %sender, error = %error, "undecodable push");
                StreamResponse::Error(ErrorResponse {
                    code: ErrorCode::Internal,
                    message: error.to_string(),
                    details: cause_chain(&error),
                })
            }
        };

        response
            .encode()
            .map_err(|error| NetworkError::Transport(error.to_string()))
    }
}

/// Maps delivery failures onto the closed wire taxonomy.
fn error_response(error: &DeliveryError) -> ErrorResponse {
    let code = match error {
        DeliveryError::NoSuchStream(_) => ErrorCode::NotFound,
        DeliveryError::Sink(SinkError::Blocked) => ErrorCode::Blocked,
        DeliveryError::Sink(SinkError::Exhausted) => ErrorCode::Exhausted,
        DeliveryError::Sink(SinkError::Other(_)) | DeliveryError::EngineStopped => {
            ErrorCode::Internal
        }
    };
    ErrorResponse {
        code,
        message: error.to_string(),
        details: cause_chain(error),
    }
}

struct RestartStreamsHandler {
    streamer: ClientStreamer,
}

#[async_trait]
impl TopicHandler for RestartStreamsHandler {
    async fn on_request(&self, sender: MemberId, request: Bytes) -> Result<Bytes, NetworkError> {
        let _ = RestartStreamsRequest::decode(&request);

        debug!(
            component = COMPONENT,
            broker = %sender,
            "broker restarted, forcing re-registration"
        );
        self.streamer
            .restart_from(sender)
            .await
            .map_err(|error| NetworkError::Transport(error.to_string()))?;

        Ok(Bytes::new())
    }
}
