//! Public gateway-side handle over the stream engine.

use crate::cluster::{ClusterNetwork, MemberId, MembershipEvent};
use crate::config::StreamerConfig;
use crate::error::{DeliveryError, StreamerError};
use crate::gateway::aggregated_stream::StreamSink;
use crate::gateway::engine::{spawn_engine, EngineCommand};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Registers interest in logical streams and receives pushed payloads.
///
/// Cloneable; all clones drive the same engine. Only these handles hold the
/// engine mailbox strongly, so dropping every clone stops the engine loop;
/// in-flight registration workers end on their next tick.
#[derive(Clone)]
pub struct ClientStreamer {
    commands: mpsc::Sender<EngineCommand>,
}

impl ClientStreamer {
    /// Spawns the stream engine on the ambient tokio runtime.
    pub fn new(network: Arc<dyn ClusterNetwork>, config: StreamerConfig) -> Self {
        Self {
            commands: spawn_engine(network, config),
        }
    }

    /// Registers (or attaches to) the stream for (stream_type, metadata) and
    /// returns the id of this local registration.
    ///
    /// The registry entry exists before any network call; registration toward
    /// each known broker proceeds asynchronously with indefinite retry. With
    /// zero known brokers the stream simply stays pending until one joins.
    pub async fn add(
        &self,
        stream_type: impl Into<Bytes>,
        metadata: impl Into<Bytes>,
        sink: Arc<dyn StreamSink>,
    ) -> Result<Uuid, StreamerError> {
        let (reply, id) = oneshot::channel();
        self.commands
            .send(EngineCommand::Add {
                stream_type: stream_type.into(),
                metadata: metadata.into(),
                sink,
                reply,
            })
            .await
            .map_err(|_| StreamerError::EngineStopped)?;
        id.await.map_err(|_| StreamerError::EngineStopped)
    }

    /// Removes one local registration immediately; broker-side cleanup is
    /// best-effort and asynchronous.
    pub async fn remove(&self, stream_id: Uuid) -> Result<(), StreamerError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(EngineCommand::Remove {
                child_id: stream_id,
                reply,
            })
            .await
            .map_err(|_| StreamerError::EngineStopped)?;
        done.await.map_err(|_| StreamerError::EngineStopped)?
    }

    /// Shutdown: fire-and-forget remove-all toward every known broker, then
    /// closes all local streams. Returns once the engine applied it locally;
    /// never waits for broker acknowledgement.
    pub async fn remove_all(&self) -> Result<(), StreamerError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(EngineCommand::RemoveAll { reply })
            .await
            .map_err(|_| StreamerError::EngineStopped)?;
        done.await.map_err(|_| StreamerError::EngineStopped)
    }

    /// Starts registering every open stream toward a newly joined broker.
    pub async fn on_server_joined(&self, broker: MemberId) -> Result<(), StreamerError> {
        self.commands
            .send(EngineCommand::MemberJoined(broker))
            .await
            .map_err(|_| StreamerError::EngineStopped)
    }

    /// Drops a departed broker from tracking; in-flight retries toward it
    /// end on their next tick.
    pub async fn on_server_removed(&self, broker: MemberId) -> Result<(), StreamerError> {
        self.commands
            .send(EngineCommand::MemberRemoved(broker))
            .await
            .map_err(|_| StreamerError::EngineStopped)
    }

    /// Consumes a membership feed and forwards it into the engine.
    pub async fn run_membership_feed(&self, mut events: mpsc::Receiver<MembershipEvent>) {
        while let Some(event) = events.recv().await {
            let outcome = match event {
                MembershipEvent::MemberJoined(member) => self.on_server_joined(member).await,
                MembershipEvent::MemberRemoved(member) => self.on_server_removed(member).await,
            };
            if outcome.is_err() {
                return;
            }
        }
    }

    /// Treats a broker as removed-then-rejoined, forcing full re-registration
    /// toward it. Invoked when that broker announces a restart.
    pub(crate) async fn restart_from(&self, broker: MemberId) -> Result<(), StreamerError> {
        self.commands
            .send(EngineCommand::RestartFrom(broker))
            .await
            .map_err(|_| StreamerError::EngineStopped)
    }

    /// Resolves an inbound push to one randomly chosen local consumer.
    pub(crate) async fn resolve_delivery(
        &self,
        wire_id: Uuid,
    ) -> Result<Arc<dyn StreamSink>, DeliveryError> {
        let (reply, sink) = oneshot::channel();
        self.commands
            .send(EngineCommand::ResolveDelivery { wire_id, reply })
            .await
            .map_err(|_| DeliveryError::EngineStopped)?;
        sink.await.map_err(|_| DeliveryError::EngineStopped)?
    }
}
