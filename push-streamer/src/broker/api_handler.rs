//! Protocol-to-registry adapters on the broker side.

use crate::broker::registry::RemoteStreamRegistry;
use crate::cluster::{ClusterNetwork, MemberId, MembershipEvent, NetworkError, TopicHandler};
use crate::wire::{
    topics, AddStreamRequest, RemoveAllRequest, RemoveStreamRequest, RestartStreamsRequest,
    WireMessage,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const COMPONENT: &str = "broker_api";

/// Subscribes the broker-side registry handlers on their topics.
pub async fn register_broker_handlers(
    network: &Arc<dyn ClusterNetwork>,
    registry: RemoteStreamRegistry,
) -> Result<(), NetworkError> {
    network
        .subscribe(
            topics::ADD_STREAM,
            Arc::new(AddStreamHandler {
                registry: registry.clone(),
            }),
        )
        .await?;
    network
        .subscribe(
            topics::REMOVE_STREAM,
            Arc::new(RemoveStreamHandler {
                registry: registry.clone(),
            }),
        )
        .await?;
    network
        .subscribe(topics::REMOVE_ALL_STREAMS, Arc::new(RemoveAllHandler { registry }))
        .await?;
    Ok(())
}

/// Drives the broker registry from the membership feed: a departed member's
/// registrations are dropped in bulk.
pub async fn run_membership_feed(
    registry: RemoteStreamRegistry,
    mut events: mpsc::Receiver<MembershipEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            MembershipEvent::MemberRemoved(member) => {
                debug!(component = COMPONENT, member = %member, "member departed");
                if registry.remove_all(member).await.is_err() {
                    warn!(component = COMPONENT, "registry stopped, ending membership feed");
                    return;
                }
            }
            MembershipEvent::MemberJoined(_) => {
                // Gateways re-register themselves toward a joining broker;
                // nothing to do on this side.
            }
        }
    }
}

/// Announces to every peer that this broker restarted and lost its registry,
/// prompting gateways to re-register all streams.
pub async fn announce_restart(network: &Arc<dyn ClusterNetwork>, peers: &[MemberId]) {
    let message = match RestartStreamsRequest.encode() {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(component = COMPONENT, error = %error, "unable to encode restart request");
            return;
        }
    };

    for peer in peers {
        if let Err(error) = network
            .unicast(topics::RESTART_STREAMS, message.clone(), peer, true)
            .await
        {
            warn!(
                component = COMPONENT,
                peer = %peer,
                error = %error,
                "unable to announce restart"
            );
        }
    }
}

struct AddStreamHandler {
    registry: RemoteStreamRegistry,
}

#[async_trait]
impl TopicHandler for AddStreamHandler {
    async fn on_request(&self, sender: MemberId, request: Bytes) -> Result<Bytes, NetworkError> {
        let request = AddStreamRequest::decode(&request)
            .map_err(|error| NetworkError::Transport(error.to_string()))?;

        debug!(
            component = COMPONENT,
            stream_id = %request.stream_id,
            receiver = %sender,
            "applying add"
        );
        self.registry
            .add(
                request.stream_type,
                request.stream_id,
                sender,
                request.metadata,
            )
            .await
            .map_err(|error| NetworkError::Transport(error.to_string()))?;

        Ok(Bytes::new())
    }
}

struct RemoveStreamHandler {
    registry: RemoteStreamRegistry,
}

#[async_trait]
impl TopicHandler for RemoveStreamHandler {
    async fn on_request(&self, sender: MemberId, request: Bytes) -> Result<Bytes, NetworkError> {
        let request = RemoveStreamRequest::decode(&request)
            .map_err(|error| NetworkError::Transport(error.to_string()))?;

        self.registry
            .remove(request.stream_id, sender)
            .await
            .map_err(|error| NetworkError::Transport(error.to_string()))?;

        Ok(Bytes::new())
    }
}

struct RemoveAllHandler {
    registry: RemoteStreamRegistry,
}

#[async_trait]
impl TopicHandler for RemoveAllHandler {
    async fn on_request(&self, sender: MemberId, request: Bytes) -> Result<Bytes, NetworkError> {
        // Arrives fire-and-forget at shutdown; the body carries nothing.
        let _ = RemoveAllRequest::decode(&request);

        debug!(component = COMPONENT, receiver = %sender, "applying remove-all");
        self.registry
            .remove_all(sender)
            .await
            .map_err(|error| NetworkError::Transport(error.to_string()))?;

        Ok(Bytes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::run_membership_feed;
    use crate::broker::registry::RemoteStreamRegistry;
    use crate::cluster::{MemberId, MembershipEvent};
    use crate::metrics::StreamMetrics;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn departed_member_loses_its_registrations() {
        let registry = RemoteStreamRegistry::new(Arc::new(StreamMetrics::new()));
        registry
            .add(
                Bytes::from_static(b"ticker"),
                Uuid::new_v4(),
                MemberId::from("gateway-1"),
                Bytes::from_static(b"{}"),
            )
            .await
            .expect("add");

        let (events, feed) = mpsc::channel(4);
        let driver = tokio::spawn(run_membership_feed(registry.clone(), feed));

        events
            .send(MembershipEvent::MemberRemoved(MemberId::from("gateway-1")))
            .await
            .expect("feed open");
        drop(events);
        driver.await.expect("feed driver completes");

        assert_eq!(registry.consumer_count(), 0);
    }
}
