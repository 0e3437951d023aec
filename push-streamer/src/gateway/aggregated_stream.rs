//! Aggregation of local registrations that share one logical stream identity.

use crate::cluster::MemberId;
use crate::error::SinkError;
use crate::wire::AddStreamRequest;
use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Identity that makes two registrations interchangeable: a payload accepted
/// by one must be acceptable to all with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalId {
    pub stream_type: Bytes,
    pub metadata: Bytes,
}

/// Consumer callback a local registration delivers into.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn accept(&self, payload: Bytes) -> Result<(), SinkError>;
}

/// One local registration, owned exclusively by its aggregate's keyed map.
/// It carries only its own id; the aggregate is found by id-based lookup,
/// never by a back-reference.
pub(crate) struct ClientStream {
    id: Uuid,
    sink: Arc<dyn StreamSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    Open,
    Closed,
}

/// All local registrations sharing one [`LogicalId`], plus the brokers that
/// have acknowledged the registration.
///
/// Exactly one aggregate exists per logical id per gateway process. The first
/// local registration creates it; further ones attach as children without
/// wire traffic. Only the aggregate's wire id ever crosses the network.
pub(crate) struct AggregatedClientStream {
    id: Uuid,
    logical: LogicalId,
    children: HashMap<Uuid, ClientStream>,
    live_connections: HashSet<MemberId>,
    state: StreamState,
}

impl AggregatedClientStream {
    pub(crate) fn new(logical: LogicalId) -> Self {
        Self {
            id: Uuid::new_v4(),
            logical,
            children: HashMap::new(),
            live_connections: HashSet::new(),
            state: StreamState::Open,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == StreamState::Open
    }

    pub(crate) fn attach(&mut self, sink: Arc<dyn StreamSink>) -> Uuid {
        let id = Uuid::new_v4();
        self.children.insert(id, ClientStream { id, sink });
        id
    }

    pub(crate) fn detach(&mut self, child_id: Uuid) -> bool {
        match self.children.remove(&child_id) {
            Some(child) => {
                debug_assert_eq!(child.id, child_id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Selects one child uniformly at random for delivery. `None` means the
    /// registration has become stale (no children left).
    pub(crate) fn pick_sink(&self) -> Option<Arc<dyn StreamSink>> {
        let children: Vec<&ClientStream> = self.children.values().collect();
        children
            .choose(&mut rand::thread_rng())
            .map(|child| child.sink.clone())
    }

    pub(crate) fn connect(&mut self, broker: MemberId) {
        self.live_connections.insert(broker);
    }

    pub(crate) fn disconnect(&mut self, broker: &MemberId) {
        self.live_connections.remove(broker);
    }

    pub(crate) fn is_connected(&self, broker: &MemberId) -> bool {
        self.live_connections.contains(broker)
    }

    /// Terminal and idempotent. Children stay attached; pending registration
    /// retries observe the state on their next tick and stop.
    pub(crate) fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    pub(crate) fn add_request(&self) -> AddStreamRequest {
        AddStreamRequest {
            stream_id: self.id,
            stream_type: self.logical.stream_type.clone(),
            metadata: self.logical.metadata.clone(),
        }
    }
}
