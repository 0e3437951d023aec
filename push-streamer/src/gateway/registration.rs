//! Per-(stream, broker) registration workers.
//!
//! One task per pair. Every tick re-checks liveness through the engine
//! mailbox before touching the wire, then either sends, finishes, or sleeps
//! out the fixed retry delay. There is no cancellation token: a closed
//! stream, a departed broker, or a stopped engine all end the worker on its
//! next tick. Workers hold the mailbox weakly and upgrade per tick, never
//! across the sleep, so they cannot keep a stopped engine alive.

use crate::cluster::{ClusterNetwork, MemberId};
use crate::config::StreamerConfig;
use crate::gateway::engine::{AddPoll, EngineCommand};
use crate::wire::{topics, RemoveStreamRequest, WireMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

const COMPONENT: &str = "registration_worker";

/// Retries AddStreamRequest toward one broker until acked, the stream
/// closes, the broker departs, or the engine stops.
pub(crate) async fn run_add_worker(
    engine: mpsc::WeakSender<EngineCommand>,
    network: Arc<dyn ClusterNetwork>,
    config: StreamerConfig,
    wire_id: Uuid,
    broker: MemberId,
) {
    loop {
        {
            let Some(mailbox) = engine.upgrade() else {
                return;
            };
            let (reply, poll) = oneshot::channel();
            if mailbox
                .send(EngineCommand::PollAdd {
                    wire_id,
                    broker: broker.clone(),
                    reply,
                })
                .await
                .is_err()
            {
                return;
            }
            let request = match poll.await {
                Ok(AddPoll::Send(request)) => request,
                Ok(AddPoll::Satisfied) | Ok(AddPoll::Closed) | Err(_) => return,
            };

            let bytes = match request.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Nothing a retry can fix about an unencodable request.
                    error!(
                        component = COMPONENT,
                        wire_id = %wire_id,
                        error = %e,
                        "dropping registration attempt"
                    );
                    return;
                }
            };

            match network
                .send(topics::ADD_STREAM, bytes, &broker, config.request_timeout())
                .await
            {
                Ok(_ack) => {
                    let _ = mailbox
                        .send(EngineCommand::MarkConnected {
                            wire_id,
                            broker: broker.clone(),
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    warn!(
                        component = COMPONENT,
                        wire_id = %wire_id,
                        broker = %broker,
                        error = %e,
                        "add attempt failed, retrying after delay"
                    );
                }
            }
        }
        sleep(config.retry_delay()).await;
    }
}

/// Retries RemoveStreamRequest toward one broker until acked, the broker
/// leaves the membership, or the engine stops. The aggregate is already gone
/// locally; duplicate or late removals are tolerated on the broker.
pub(crate) async fn run_remove_worker(
    engine: mpsc::WeakSender<EngineCommand>,
    network: Arc<dyn ClusterNetwork>,
    config: StreamerConfig,
    wire_id: Uuid,
    broker: MemberId,
) {
    let request = RemoveStreamRequest { stream_id: wire_id };
    let bytes = match request.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(component = COMPONENT, wire_id = %wire_id, error = %e, "dropping removal");
            return;
        }
    };

    loop {
        {
            let Some(mailbox) = engine.upgrade() else {
                return;
            };
            let (reply, known) = oneshot::channel();
            if mailbox
                .send(EngineCommand::BrokerKnown {
                    broker: broker.clone(),
                    reply,
                })
                .await
                .is_err()
            {
                return;
            }
            match known.await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    debug!(
                        component = COMPONENT,
                        wire_id = %wire_id,
                        broker = %broker,
                        "broker departed, abandoning removal"
                    );
                    return;
                }
            }

            match network
                .send(
                    topics::REMOVE_STREAM,
                    bytes.clone(),
                    &broker,
                    config.request_timeout(),
                )
                .await
            {
                Ok(_ack) => return,
                Err(e) => {
                    warn!(
                        component = COMPONENT,
                        wire_id = %wire_id,
                        broker = %broker,
                        error = %e,
                        "removal attempt failed, retrying after delay"
                    );
                }
            }
        }
        sleep(config.retry_delay()).await;
    }
}
