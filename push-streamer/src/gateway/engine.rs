//! Single-writer command loop owning the gateway-side stream registry.
//!
//! All registry maps live inside the loop task; external calls arrive as
//! commands over the mailbox and answer through oneshot replies, so callers
//! get futures and the maps never need locks. Registration retry workers are
//! spawned from here and re-enter through a weak handle to the same mailbox
//! on every tick, which is how closing a stream starves its pending retries.
//! Only external handles hold the mailbox strongly, so dropping the last one
//! ends the loop and, one tick later, every worker.

use crate::cluster::{ClusterNetwork, MemberId};
use crate::config::StreamerConfig;
use crate::error::{DeliveryError, StreamerError};
use crate::gateway::aggregated_stream::{AggregatedClientStream, LogicalId, StreamSink};
use crate::gateway::registration::{run_add_worker, run_remove_worker};
use crate::wire::{topics, AddStreamRequest, RemoveAllRequest, WireMessage};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use uuid::Uuid;

const COMPONENT: &str = "client_stream_engine";
const COMMAND_QUEUE_SIZE: usize = 128;

/// Answer to a registration worker's per-tick liveness recheck.
pub(crate) enum AddPoll {
    /// Stream open, broker known, not yet acked: send this request.
    Send(AddStreamRequest),
    /// Nothing left to do (already connected, or the broker departed).
    Satisfied,
    /// The stream is closed or gone; the worker must stop.
    Closed,
}

pub(crate) enum EngineCommand {
    Add {
        stream_type: Bytes,
        metadata: Bytes,
        sink: Arc<dyn StreamSink>,
        reply: oneshot::Sender<Uuid>,
    },
    Remove {
        child_id: Uuid,
        reply: oneshot::Sender<Result<(), StreamerError>>,
    },
    ResolveDelivery {
        wire_id: Uuid,
        reply: oneshot::Sender<Result<Arc<dyn StreamSink>, DeliveryError>>,
    },
    MemberJoined(MemberId),
    MemberRemoved(MemberId),
    RestartFrom(MemberId),
    PollAdd {
        wire_id: Uuid,
        broker: MemberId,
        reply: oneshot::Sender<AddPoll>,
    },
    MarkConnected {
        wire_id: Uuid,
        broker: MemberId,
    },
    BrokerKnown {
        broker: MemberId,
        reply: oneshot::Sender<bool>,
    },
    RemoveAll {
        reply: oneshot::Sender<()>,
    },
}

/// Spawns the engine loop and returns its mailbox.
pub(crate) fn spawn_engine(
    network: Arc<dyn ClusterNetwork>,
    config: StreamerConfig,
) -> mpsc::Sender<EngineCommand> {
    let (mailbox, commands) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let engine = ClientStreamEngine {
        streams: HashMap::new(),
        by_wire_id: HashMap::new(),
        by_child_id: HashMap::new(),
        brokers: HashSet::new(),
        network,
        config,
        mailbox: mailbox.downgrade(),
    };
    tokio::spawn(engine.run(commands));
    mailbox
}

struct ClientStreamEngine {
    streams: HashMap<LogicalId, AggregatedClientStream>,
    by_wire_id: HashMap<Uuid, LogicalId>,
    by_child_id: HashMap<Uuid, LogicalId>,
    brokers: HashSet<MemberId>,
    network: Arc<dyn ClusterNetwork>,
    config: StreamerConfig,
    // Weak: the loop must not keep its own mailbox open.
    mailbox: mpsc::WeakSender<EngineCommand>,
}

impl ClientStreamEngine {
    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                EngineCommand::Add {
                    stream_type,
                    metadata,
                    sink,
                    reply,
                } => {
                    let child_id = self.add(stream_type, metadata, sink);
                    let _ = reply.send(child_id);
                }
                EngineCommand::Remove { child_id, reply } => {
                    let _ = reply.send(self.remove(child_id));
                }
                EngineCommand::ResolveDelivery { wire_id, reply } => {
                    let _ = reply.send(self.resolve_delivery(wire_id));
                }
                EngineCommand::MemberJoined(broker) => self.member_joined(broker),
                EngineCommand::MemberRemoved(broker) => self.member_removed(&broker),
                EngineCommand::RestartFrom(broker) => {
                    self.member_removed(&broker);
                    self.member_joined(broker);
                }
                EngineCommand::PollAdd {
                    wire_id,
                    broker,
                    reply,
                } => {
                    let _ = reply.send(self.poll_add(wire_id, &broker));
                }
                EngineCommand::MarkConnected { wire_id, broker } => {
                    self.mark_connected(wire_id, broker);
                }
                EngineCommand::BrokerKnown { broker, reply } => {
                    let _ = reply.send(self.brokers.contains(&broker));
                }
                EngineCommand::RemoveAll { reply } => {
                    self.remove_all();
                    let _ = reply.send(());
                }
            }
        }
        debug!(component = COMPONENT, "engine loop stopped");
    }

    /// Records the registration locally before any network call, so a broker
    /// join racing with this add is guaranteed to see the stream.
    fn add(&mut self, stream_type: Bytes, metadata: Bytes, sink: Arc<dyn StreamSink>) -> Uuid {
        let logical = LogicalId {
            stream_type,
            metadata,
        };

        if let Some(aggregate) = self.streams.get_mut(&logical) {
            let child_id = aggregate.attach(sink);
            self.by_child_id.insert(child_id, logical);
            debug!(
                component = COMPONENT,
                wire_id = %aggregate.id(),
                children = aggregate.child_count(),
                "attached to existing aggregate, no wire traffic"
            );
            return child_id;
        }

        let mut aggregate = AggregatedClientStream::new(logical.clone());
        let child_id = aggregate.attach(sink);
        let wire_id = aggregate.id();

        self.by_wire_id.insert(wire_id, logical.clone());
        self.by_child_id.insert(child_id, logical.clone());
        self.streams.insert(logical, aggregate);

        debug!(
            component = COMPONENT,
            wire_id = %wire_id,
            brokers = self.brokers.len(),
            "created aggregate, opening toward known brokers"
        );
        for broker in self.brokers.clone() {
            self.spawn_add_worker(wire_id, broker);
        }
        child_id
    }

    /// Optimistic local removal; wire removal happens only when the last
    /// child goes and the aggregate is destroyed.
    fn remove(&mut self, child_id: Uuid) -> Result<(), StreamerError> {
        let Some(logical) = self.by_child_id.remove(&child_id) else {
            return Err(StreamerError::UnknownStream(child_id));
        };
        let Some(aggregate) = self.streams.get_mut(&logical) else {
            return Err(StreamerError::UnknownStream(child_id));
        };

        aggregate.detach(child_id);
        trace!(component = COMPONENT, child_id = %child_id, "detached child");
        if aggregate.has_children() {
            return Ok(());
        }

        aggregate.close();
        let wire_id = aggregate.id();
        self.by_wire_id.remove(&wire_id);
        self.streams.remove(&logical);

        debug!(
            component = COMPONENT,
            wire_id = %wire_id,
            "last child removed, withdrawing registration"
        );
        for broker in self.brokers.clone() {
            self.spawn_remove_worker(wire_id, broker);
        }
        Ok(())
    }

    fn resolve_delivery(&self, wire_id: Uuid) -> Result<Arc<dyn StreamSink>, DeliveryError> {
        let sink = self
            .by_wire_id
            .get(&wire_id)
            .and_then(|logical| self.streams.get(logical))
            .filter(|aggregate| aggregate.is_open())
            .and_then(|aggregate| aggregate.pick_sink());

        sink.ok_or(DeliveryError::NoSuchStream(wire_id))
    }

    /// A (re)joined broker has no registrations for this gateway; open every
    /// aggregate toward it. Workers skip streams already acked.
    fn member_joined(&mut self, broker: MemberId) {
        if !self.brokers.insert(broker.clone()) {
            return;
        }
        debug!(
            component = COMPONENT,
            broker = %broker,
            streams = self.streams.len(),
            "broker joined, re-registering all aggregates"
        );
        let wire_ids: Vec<Uuid> = self.streams.values().map(|a| a.id()).collect();
        for wire_id in wire_ids {
            self.spawn_add_worker(wire_id, broker.clone());
        }
    }

    fn member_removed(&mut self, broker: &MemberId) {
        if !self.brokers.remove(broker) {
            return;
        }
        debug!(component = COMPONENT, broker = %broker, "broker removed from tracking");
        for aggregate in self.streams.values_mut() {
            aggregate.disconnect(broker);
        }
    }

    fn poll_add(&self, wire_id: Uuid, broker: &MemberId) -> AddPoll {
        let Some(aggregate) = self
            .by_wire_id
            .get(&wire_id)
            .and_then(|logical| self.streams.get(logical))
        else {
            return AddPoll::Closed;
        };
        if !aggregate.is_open() {
            return AddPoll::Closed;
        }
        if !self.brokers.contains(broker) || aggregate.is_connected(broker) {
            return AddPoll::Satisfied;
        }
        AddPoll::Send(aggregate.add_request())
    }

    fn mark_connected(&mut self, wire_id: Uuid, broker: MemberId) {
        if !self.brokers.contains(&broker) {
            // Broker departed between ack and this command; a rejoin will
            // re-register from scratch.
            return;
        }
        if let Some(aggregate) = self
            .by_wire_id
            .get(&wire_id)
            .and_then(|logical| self.streams.get_mut(logical))
        {
            debug!(
                component = COMPONENT,
                wire_id = %wire_id,
                broker = %broker,
                "registration acknowledged"
            );
            aggregate.connect(broker);
        }
    }

    /// Shutdown: best-effort fire-and-forget remove-all toward every broker,
    /// then close everything locally. Never waits for acknowledgement.
    fn remove_all(&mut self) {
        for broker in &self.brokers {
            let network = self.network.clone();
            let broker = broker.clone();
            tokio::spawn(async move {
                let message = match RemoveAllRequest.encode() {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        warn!(component = COMPONENT, error = %error, "unable to encode remove-all");
                        return;
                    }
                };
                if let Err(error) = network
                    .unicast(topics::REMOVE_ALL_STREAMS, message, &broker, false)
                    .await
                {
                    debug!(
                        component = COMPONENT,
                        broker = %broker,
                        error = %error,
                        "remove-all not delivered"
                    );
                }
            });
        }

        for aggregate in self.streams.values_mut() {
            aggregate.close();
        }
        self.streams.clear();
        self.by_wire_id.clear();
        self.by_child_id.clear();
    }

    fn spawn_add_worker(&self, wire_id: Uuid, broker: MemberId) {
        tokio::spawn(run_add_worker(
            self.mailbox.clone(),
            self.network.clone(),
            self.config.clone(),
            wire_id,
            broker,
        ));
    }

    fn spawn_remove_worker(&self, wire_id: Uuid, broker: MemberId) {
        tokio::spawn(run_remove_worker(
            self.mailbox.clone(),
            self.network.clone(),
            self.config.clone(),
            wire_id,
            broker,
        ));
    }
}
