//! Broker-side routing surface: resolve a stream type to a logically
//! equivalent consumer group and push payloads to one member of it.

use crate::broker::picker::{StreamPicker, UniformRandomPicker};
use crate::broker::pusher::RemoteStreamPusher;
use crate::broker::registry::{RemoteStreamRegistry, StreamConsumer};
use crate::cluster::ClusterNetwork;
use crate::config::StreamerConfig;
use crate::error::PushError;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

const COMPONENT: &str = "remote_streamer";

/// Entry point handed to broker-side business logic.
pub struct RemoteStreamer {
    registry: RemoteStreamRegistry,
    picker: Arc<dyn StreamPicker>,
    pusher: Arc<RemoteStreamPusher>,
}

impl RemoteStreamer {
    pub fn new(
        registry: RemoteStreamRegistry,
        network: Arc<dyn ClusterNetwork>,
        config: &StreamerConfig,
    ) -> Self {
        let metrics = registry.metrics().clone();
        Self {
            registry,
            picker: Arc::new(UniformRandomPicker),
            pusher: Arc::new(RemoteStreamPusher::new(
                network,
                metrics,
                config.push_timeout(),
            )),
        }
    }

    /// Swaps the target-selection strategy.
    pub fn with_picker(mut self, picker: Arc<dyn StreamPicker>) -> Self {
        self.picker = picker;
        self
    }

    /// Resolves the consumer group for a stream type.
    ///
    /// Returns `None` when nobody is registered; what to do with the payload
    /// then (drop, hold) is the caller's policy. Otherwise one candidate is
    /// picked and the result widened to exactly the registrations sharing the
    /// candidate's full logical identity (type + properties), so any member
    /// can legally receive the same payload.
    pub fn stream_for(&self, stream_type: &[u8]) -> Option<RemoteStream> {
        let group = self.registry.get(stream_type)?;
        let candidates: Vec<Arc<StreamConsumer>> = group.values().cloned().collect();
        let chosen = self.picker.pick(&candidates)?.clone();

        let targets: Vec<Arc<StreamConsumer>> = candidates
            .iter()
            .filter(|candidate| candidate.properties == chosen.properties)
            .cloned()
            .collect();

        Some(RemoteStream {
            metadata: chosen.properties.clone(),
            targets,
            picker: self.picker.clone(),
            pusher: self.pusher.clone(),
        })
    }
}

/// One resolved logical stream: a set of interchangeable remote consumers.
pub struct RemoteStream {
    metadata: Bytes,
    targets: Vec<Arc<StreamConsumer>>,
    picker: Arc<dyn StreamPicker>,
    pusher: Arc<RemoteStreamPusher>,
}

impl RemoteStream {
    /// Opaque properties shared by every member of this group.
    pub fn metadata(&self) -> &Bytes {
        &self.metadata
    }

    /// The interchangeable registrations this stream may push to.
    pub fn consumers(&self) -> &[Arc<StreamConsumer>] {
        &self.targets
    }

    /// Asynchronous, single-attempt push to one member of the group.
    ///
    /// Each call picks its own target, so consecutive pushes may land on
    /// different members; no ordering guarantee exists within the group. On
    /// failure `on_error` receives the error together with the payload and no
    /// retry is issued here.
    pub fn push<F>(&self, payload: Bytes, on_error: F)
    where
        F: FnOnce(PushError, Bytes) + Send + 'static,
    {
        let Some(target) = self.picker.pick(&self.targets) else {
            on_error(PushError::NoTarget, payload);
            return;
        };
        let target = target.id.clone();
        let pusher = self.pusher.clone();

        tokio::spawn(async move {
            if let Err(error) = pusher.push(&target, payload.clone()).await {
                warn!(
                    component = COMPONENT,
                    stream_id = %target.stream_id,
                    receiver = %target.receiver,
                    error = %error,
                    "push attempt failed"
                );
                on_error(error, payload);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::RemoteStreamer;
    use crate::broker::registry::RemoteStreamRegistry;
    use crate::cluster::{ClusterNetwork, MemberId, NetworkError, TopicHandler};
    use crate::config::StreamerConfig;
    use crate::metrics::StreamMetrics;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    struct NoopNetwork;

    #[async_trait]
    impl ClusterNetwork for NoopNetwork {
        async fn send(
            &self,
            _topic: &str,
            _request: Bytes,
            _target: &MemberId,
            _timeout: Duration,
        ) -> Result<Bytes, NetworkError> {
            Ok(Bytes::new())
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _handler: Arc<dyn TopicHandler>,
        ) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn unicast(
            &self,
            _topic: &str,
            _message: Bytes,
            _target: &MemberId,
            _reliable: bool,
        ) -> Result<(), NetworkError> {
            Ok(())
        }
    }

    fn streamer(registry: RemoteStreamRegistry) -> RemoteStreamer {
        RemoteStreamer::new(registry, Arc::new(NoopNetwork), &StreamerConfig::default())
    }

    #[tokio::test]
    async fn stream_for_unknown_type_is_none() {
        let registry = RemoteStreamRegistry::new(Arc::new(StreamMetrics::new()));
        let streamer = streamer(registry);

        assert!(streamer.stream_for(b"nobody-listens").is_none());
    }

    #[tokio::test]
    async fn stream_for_widens_to_the_chosen_logical_identity() {
        let registry = RemoteStreamRegistry::new(Arc::new(StreamMetrics::new()));

        // Two registrations with identical properties, one with different
        // properties but the same type.
        let shared = Uuid::new_v4();
        registry
            .add(
                Bytes::from_static(b"ticker"),
                shared,
                MemberId::from("gateway-1"),
                Bytes::from_static(b"{\"x\":1}"),
            )
            .await
            .expect("add");
        registry
            .add(
                Bytes::from_static(b"ticker"),
                shared,
                MemberId::from("gateway-2"),
                Bytes::from_static(b"{\"x\":1}"),
            )
            .await
            .expect("add");
        registry
            .add(
                Bytes::from_static(b"ticker"),
                Uuid::new_v4(),
                MemberId::from("gateway-3"),
                Bytes::from_static(b"{\"x\":2}"),
            )
            .await
            .expect("add");

        let stream = streamer(registry)
            .stream_for(b"ticker")
            .expect("registered type resolves");

        for consumer in stream.consumers() {
            assert_eq!(&consumer.properties, stream.metadata());
        }
        match stream.metadata().as_ref() {
            b"{\"x\":1}" => assert_eq!(stream.consumers().len(), 2),
            b"{\"x\":2}" => assert_eq!(stream.consumers().len(), 1),
            other => panic!("unexpected metadata {other:?}"),
        }
    }
}
