//! Gateway and broker engines wired together through an in-memory cluster
//! network.

use async_trait::async_trait;
use bytes::Bytes;
use push_streamer::{
    announce_restart, register_broker_handlers, register_gateway_handlers, ClientStreamer,
    ClusterNetwork, MemberId, NetworkError, PushError, RemoteStreamRegistry, RemoteStreamer,
    SinkError, StreamMetrics, StreamSink, StreamerConfig, TopicHandler,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

/// Routes topic traffic between in-process members.
#[derive(Default)]
struct Hub {
    handlers: Mutex<HashMap<(MemberId, String), Arc<dyn TopicHandler>>>,
}

impl Hub {
    fn handler(&self, target: &MemberId, topic: &str) -> Option<Arc<dyn TopicHandler>> {
        self.handlers
            .lock()
            .expect("lock handlers")
            .get(&(target.clone(), topic.to_string()))
            .cloned()
    }

    fn attach(self: &Arc<Self>, member: &str) -> Arc<dyn ClusterNetwork> {
        Arc::new(NodeNetwork {
            hub: self.clone(),
            local: MemberId::from(member),
        })
    }
}

struct NodeNetwork {
    hub: Arc<Hub>,
    local: MemberId,
}

#[async_trait]
impl ClusterNetwork for NodeNetwork {
    async fn send(
        &self,
        topic: &str,
        request: Bytes,
        target: &MemberId,
        _timeout: Duration,
    ) -> Result<Bytes, NetworkError> {
        let Some(handler) = self.hub.handler(target, topic) else {
            return Err(NetworkError::Unreachable(target.clone()));
        };
        handler.on_request(self.local.clone(), request).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), NetworkError> {
        self.hub
            .handlers
            .lock()
            .expect("lock handlers")
            .insert((self.local.clone(), topic.to_string()), handler);
        Ok(())
    }

    async fn unicast(
        &self,
        topic: &str,
        message: Bytes,
        target: &MemberId,
        _reliable: bool,
    ) -> Result<(), NetworkError> {
        if let Some(handler) = self.hub.handler(target, topic) {
            let _ = handler.on_request(self.local.clone(), message).await;
        }
        Ok(())
    }
}

struct CountingSink {
    payloads: Mutex<Vec<Bytes>>,
    outcome: fn() -> Result<(), SinkError>,
}

impl CountingSink {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
            outcome: || Ok(()),
        })
    }

    fn blocked() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
            outcome: || Err(SinkError::Blocked),
        })
    }

    fn delivered(&self) -> Vec<Bytes> {
        self.payloads.lock().expect("lock payloads").clone()
    }
}

#[async_trait]
impl StreamSink for CountingSink {
    async fn accept(&self, payload: Bytes) -> Result<(), SinkError> {
        self.payloads.lock().expect("lock payloads").push(payload);
        (self.outcome)()
    }
}

struct BrokerNode {
    member: MemberId,
    network: Arc<dyn ClusterNetwork>,
    registry: RemoteStreamRegistry,
    streamer: RemoteStreamer,
    metrics: Arc<StreamMetrics>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start_broker(hub: &Arc<Hub>, member: &str) -> BrokerNode {
    init_tracing();
    let network = hub.attach(member);
    let metrics = Arc::new(StreamMetrics::new());
    let registry = RemoteStreamRegistry::new(metrics.clone());
    register_broker_handlers(&network, registry.clone())
        .await
        .expect("broker handlers subscribe");
    let streamer = RemoteStreamer::new(registry.clone(), network.clone(), &config());
    BrokerNode {
        member: MemberId::from(member),
        network,
        registry,
        streamer,
        metrics,
    }
}

struct GatewayNode {
    member: MemberId,
    streamer: ClientStreamer,
}

async fn start_gateway(hub: &Arc<Hub>, member: &str) -> GatewayNode {
    let network = hub.attach(member);
    let streamer = ClientStreamer::new(network.clone(), config());
    register_gateway_handlers(&network, streamer.clone())
        .await
        .expect("gateway handlers subscribe");
    GatewayNode {
        member: MemberId::from(member),
        streamer,
    }
}

fn config() -> StreamerConfig {
    StreamerConfig {
        request_timeout_ms: 100,
        retry_delay_ms: 200,
        push_timeout_ms: 1_000,
    }
}

async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn payload_reaches_exactly_one_registered_consumer() {
    let hub = Arc::new(Hub::default());
    let broker = start_broker(&hub, "broker-1").await;
    let gateway = start_gateway(&hub, "gateway-1").await;

    let sink = CountingSink::accepting();
    gateway
        .streamer
        .on_server_joined(broker.member.clone())
        .await
        .expect("join");
    gateway
        .streamer
        .add("ticker", "{\"x\":1}", sink.clone())
        .await
        .expect("add");
    settle().await;
    assert_eq!(broker.registry.consumer_count(), 1);

    let stream = broker
        .streamer
        .stream_for(b"ticker")
        .expect("registered type resolves");
    assert_eq!(stream.metadata(), &Bytes::from_static(b"{\"x\":1}"));

    let errors = Arc::new(AtomicUsize::new(0));
    let errors_seen = errors.clone();
    stream.push(Bytes::from_static(b"payload-1"), move |_, _| {
        errors_seen.fetch_add(1, Ordering::SeqCst);
    });
    settle().await;

    assert_eq!(sink.delivered(), vec![Bytes::from_static(b"payload-1")]);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    let snapshot = broker.metrics.snapshot();
    assert_eq!(snapshot.push_succeeded, 1);
    assert_eq!(snapshot.push_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn unregistered_type_resolves_to_no_stream() {
    let hub = Arc::new(Hub::default());
    let broker = start_broker(&hub, "broker-1").await;

    assert!(broker.streamer.stream_for(b"nobody-listens").is_none());
}

#[tokio::test(start_paused = true)]
async fn stale_push_surfaces_not_found_to_the_error_handler() {
    let hub = Arc::new(Hub::default());
    let broker = start_broker(&hub, "broker-1").await;
    let gateway = start_gateway(&hub, "gateway-1").await;

    gateway
        .streamer
        .on_server_joined(broker.member.clone())
        .await
        .expect("join");
    let id = gateway
        .streamer
        .add("ticker", "{\"x\":1}", CountingSink::accepting())
        .await
        .expect("add");
    settle().await;

    // Resolve while registered, then let the gateway forget the stream.
    let stream = broker.streamer.stream_for(b"ticker").expect("resolves");
    gateway.streamer.remove(id).await.expect("remove");
    settle().await;

    let rejections = Arc::new(Mutex::new(Vec::new()));
    let seen = rejections.clone();
    stream.push(Bytes::from_static(b"late"), move |error, payload| {
        seen.lock().expect("lock rejections").push((error, payload));
    });
    settle().await;

    let rejections = rejections.lock().expect("lock rejections");
    assert_eq!(rejections.len(), 1);
    let (error, payload) = &rejections[0];
    assert_eq!(payload, &Bytes::from_static(b"late"));
    assert!(
        matches!(
            error,
            PushError::Rejected(response)
                if response.code == push_streamer::wire::ErrorCode::NotFound
        ),
        "unexpected error {error:?}"
    );
    assert_eq!(broker.metrics.snapshot().push_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn blocked_consumer_is_reported_as_blocked() {
    let hub = Arc::new(Hub::default());
    let broker = start_broker(&hub, "broker-1").await;
    let gateway = start_gateway(&hub, "gateway-1").await;

    gateway
        .streamer
        .on_server_joined(broker.member.clone())
        .await
        .expect("join");
    gateway
        .streamer
        .add("ticker", "{\"x\":1}", CountingSink::blocked())
        .await
        .expect("add");
    settle().await;

    let stream = broker.streamer.stream_for(b"ticker").expect("resolves");
    let codes = Arc::new(Mutex::new(Vec::new()));
    let seen = codes.clone();
    stream.push(Bytes::from_static(b"pressure"), move |error, _| {
        if let PushError::Rejected(response) = error {
            seen.lock().expect("lock codes").push(response.code);
        }
    });
    settle().await;

    assert_eq!(
        codes.lock().expect("lock codes").as_slice(),
        &[push_streamer::wire::ErrorCode::Blocked]
    );
}

#[tokio::test(start_paused = true)]
async fn two_gateways_form_one_load_distributed_group() {
    let hub = Arc::new(Hub::default());
    let broker = start_broker(&hub, "broker-1").await;
    let gateway_a = start_gateway(&hub, "gateway-1").await;
    let gateway_b = start_gateway(&hub, "gateway-2").await;

    let sink_a = CountingSink::accepting();
    let sink_b = CountingSink::accepting();
    for (gateway, sink) in [(&gateway_a, &sink_a), (&gateway_b, &sink_b)] {
        gateway
            .streamer
            .on_server_joined(broker.member.clone())
            .await
            .expect("join");
        gateway
            .streamer
            .add("ticker", "{\"x\":1}", sink.clone())
            .await
            .expect("add");
    }
    settle().await;
    assert_eq!(broker.registry.consumer_count(), 2);

    for _ in 0..40 {
        let stream = broker.streamer.stream_for(b"ticker").expect("resolves");
        assert_eq!(stream.consumers().len(), 2);
        stream.push(Bytes::from_static(b"tick"), |_, _| {});
    }
    settle().await;

    let (a, b) = (sink_a.delivered().len(), sink_b.delivered().len());
    assert_eq!(a + b, 40);
    assert!(a > 0 && b > 0, "expected both gateways to receive, got {a}/{b}");
}

#[tokio::test(start_paused = true)]
async fn restart_announcement_forces_full_reregistration() {
    let hub = Arc::new(Hub::default());
    let broker = start_broker(&hub, "broker-1").await;
    let gateway = start_gateway(&hub, "gateway-1").await;

    gateway
        .streamer
        .on_server_joined(broker.member.clone())
        .await
        .expect("join");
    gateway
        .streamer
        .add("ticker", "{\"x\":1}", CountingSink::accepting())
        .await
        .expect("add");
    settle().await;
    assert_eq!(broker.registry.consumer_count(), 1);

    // Simulate the broker losing its registry across a restart.
    broker
        .registry
        .remove_all(gateway.member.clone())
        .await
        .expect("registry wipe");
    assert_eq!(broker.registry.consumer_count(), 0);

    announce_restart(&broker.network, &[gateway.member.clone()]).await;
    settle().await;

    assert_eq!(broker.registry.consumer_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn gateway_shutdown_clears_broker_registrations() {
    let hub = Arc::new(Hub::default());
    let broker = start_broker(&hub, "broker-1").await;
    let gateway = start_gateway(&hub, "gateway-1").await;

    gateway
        .streamer
        .on_server_joined(broker.member.clone())
        .await
        .expect("join");
    for stream_type in ["ticker", "trades"] {
        gateway
            .streamer
            .add(stream_type, "{}", CountingSink::accepting())
            .await
            .expect("add");
    }
    settle().await;
    assert_eq!(broker.registry.consumer_count(), 2);

    gateway.streamer.remove_all().await.expect("remove_all");
    settle().await;

    assert_eq!(broker.registry.consumer_count(), 0);
}
