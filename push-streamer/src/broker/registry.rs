//! Broker-side registry of remote consumer registrations.
//!
//! Mutations funnel through a single writer loop; the per-type index is
//! republished through [`ArcSwap`] on every change, so request-handling
//! threads read immutable snapshots without locks and never observe a torn
//! bucket.

use crate::cluster::MemberId;
use crate::error::StreamerError;
use crate::metrics::StreamMetrics;
use arc_swap::ArcSwap;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

const COMPONENT: &str = "remote_stream_registry";
const COMMAND_QUEUE_SIZE: usize = 128;

/// Unique key of one remote registration. A stream id may legitimately be
/// registered by several receivers; identity is always the pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub stream_id: Uuid,
    pub receiver: MemberId,
}

/// One remote consumer registration held by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConsumer {
    pub id: StreamId,
    pub stream_type: Bytes,
    pub properties: Bytes,
}

/// All registrations of one stream type, keyed by full registration identity.
pub type ConsumerGroup = HashMap<StreamId, Arc<StreamConsumer>>;

type TypeIndex = HashMap<Bytes, Arc<ConsumerGroup>>;

enum RegistryCommand {
    Add {
        stream_type: Bytes,
        stream_id: Uuid,
        receiver: MemberId,
        properties: Bytes,
        reply: oneshot::Sender<()>,
    },
    Remove {
        stream_id: Uuid,
        receiver: MemberId,
        reply: oneshot::Sender<()>,
    },
    RemoveAll {
        receiver: MemberId,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle over the registry writer loop.
///
/// `add`/`remove`/`remove_all` enqueue commands and resolve when applied;
/// [`RemoteStreamRegistry::get`] reads the current index snapshot lock-free.
#[derive(Clone)]
pub struct RemoteStreamRegistry {
    commands: mpsc::Sender<RegistryCommand>,
    index: Arc<ArcSwap<TypeIndex>>,
    metrics: Arc<StreamMetrics>,
}

impl RemoteStreamRegistry {
    /// Spawns the writer loop on the ambient tokio runtime.
    pub fn new(metrics: Arc<StreamMetrics>) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let index = Arc::new(ArcSwap::from_pointee(TypeIndex::new()));

        let writer = RegistryWriter {
            by_id: HashMap::new(),
            index: index.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(writer.run(receiver));

        Self {
            commands,
            index,
            metrics,
        }
    }

    /// Registers one remote consumer. A no-op when the (stream_id, receiver)
    /// pair is already present.
    pub async fn add(
        &self,
        stream_type: Bytes,
        stream_id: Uuid,
        receiver: MemberId,
        properties: Bytes,
    ) -> Result<(), StreamerError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(RegistryCommand::Add {
                stream_type,
                stream_id,
                receiver,
                properties,
                reply,
            })
            .await
            .map_err(|_| StreamerError::EngineStopped)?;
        done.await.map_err(|_| StreamerError::EngineStopped)
    }

    /// Removes one registration. Tolerates duplicate or late removal.
    pub async fn remove(&self, stream_id: Uuid, receiver: MemberId) -> Result<(), StreamerError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(RegistryCommand::Remove {
                stream_id,
                receiver,
                reply,
            })
            .await
            .map_err(|_| StreamerError::EngineStopped)?;
        done.await.map_err(|_| StreamerError::EngineStopped)
    }

    /// Removes every registration whose receiver equals `receiver`. Used when
    /// the membership feed reports that node as departed.
    pub async fn remove_all(&self, receiver: MemberId) -> Result<(), StreamerError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(RegistryCommand::RemoveAll { receiver, reply })
            .await
            .map_err(|_| StreamerError::EngineStopped)?;
        done.await.map_err(|_| StreamerError::EngineStopped)
    }

    /// Lock-free snapshot read of all consumers registered for a stream type.
    pub fn get(&self, stream_type: &[u8]) -> Option<Arc<ConsumerGroup>> {
        self.index.load().get(stream_type).cloned()
    }

    /// Total registrations across all types.
    pub fn consumer_count(&self) -> usize {
        self.index.load().values().map(|group| group.len()).sum()
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }
}

struct RegistryWriter {
    by_id: HashMap<StreamId, Arc<StreamConsumer>>,
    index: Arc<ArcSwap<TypeIndex>>,
    metrics: Arc<StreamMetrics>,
}

impl RegistryWriter {
    async fn run(mut self, mut commands: mpsc::Receiver<RegistryCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                RegistryCommand::Add {
                    stream_type,
                    stream_id,
                    receiver,
                    properties,
                    reply,
                } => {
                    self.add(stream_type, stream_id, receiver, properties);
                    let _ = reply.send(());
                }
                RegistryCommand::Remove {
                    stream_id,
                    receiver,
                    reply,
                } => {
                    self.remove(stream_id, receiver);
                    let _ = reply.send(());
                }
                RegistryCommand::RemoveAll { receiver, reply } => {
                    self.remove_all(&receiver);
                    let _ = reply.send(());
                }
            }
        }
        debug!(component = COMPONENT, "registry writer loop stopped");
    }

    fn add(&mut self, stream_type: Bytes, stream_id: Uuid, receiver: MemberId, properties: Bytes) {
        let id = StreamId {
            stream_id,
            receiver,
        };
        if self.by_id.contains_key(&id) {
            debug!(
                component = COMPONENT,
                stream_id = %id.stream_id,
                receiver = %id.receiver,
                "duplicate add ignored"
            );
            return;
        }

        let consumer = Arc::new(StreamConsumer {
            id: id.clone(),
            stream_type: stream_type.clone(),
            properties,
        });
        self.by_id.insert(id.clone(), consumer.clone());

        let mut next: TypeIndex = (**self.index.load()).clone();
        let mut bucket = next
            .get(&stream_type)
            .map(|group| (**group).clone())
            .unwrap_or_default();
        bucket.insert(id, consumer);
        next.insert(stream_type, Arc::new(bucket));
        self.index.store(Arc::new(next));

        self.metrics.consumer_added();
    }

    fn remove(&mut self, stream_id: Uuid, receiver: MemberId) {
        let id = StreamId {
            stream_id,
            receiver,
        };
        let Some(consumer) = self.by_id.remove(&id) else {
            debug!(
                component = COMPONENT,
                stream_id = %id.stream_id,
                receiver = %id.receiver,
                "remove for absent registration ignored"
            );
            return;
        };

        let mut next: TypeIndex = (**self.index.load()).clone();
        Self::drop_from_bucket(&mut next, &consumer.stream_type, &id);
        self.index.store(Arc::new(next));

        self.metrics.consumers_removed(1);
    }

    fn remove_all(&mut self, receiver: &MemberId) {
        let departed: Vec<StreamId> = self
            .by_id
            .keys()
            .filter(|id| &id.receiver == receiver)
            .cloned()
            .collect();
        if departed.is_empty() {
            return;
        }

        let mut next: TypeIndex = (**self.index.load()).clone();
        for id in &departed {
            if let Some(consumer) = self.by_id.remove(id) {
                Self::drop_from_bucket(&mut next, &consumer.stream_type, id);
            }
        }
        self.index.store(Arc::new(next));

        self.metrics.consumers_removed(departed.len() as u64);
        warn!(
            component = COMPONENT,
            receiver = %receiver,
            removed = departed.len(),
            "removed all registrations of departed member"
        );
    }

    fn drop_from_bucket(index: &mut TypeIndex, stream_type: &Bytes, id: &StreamId) {
        let Some(group) = index.get(stream_type) else {
            return;
        };
        let mut bucket = (**group).clone();
        bucket.remove(id);
        if bucket.is_empty() {
            index.remove(stream_type);
        } else {
            index.insert(stream_type.clone(), Arc::new(bucket));
        }
    }
}
