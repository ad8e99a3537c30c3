//! Publisher and subscriber halves of the fan-out bridge.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use scribe_core::Edit;
use snafu::ResultExt;
use snafu::Snafu;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bus::BusMessage;
use crate::bus::EditBus;
use crate::topic::doc_topic;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FanoutError {
    #[snafu(display("failed to serialize edit for doc '{doc_id}': {source}"))]
    SerializeEdit {
        doc_id: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to publish edit for doc '{doc_id}': {source}"))]
    PublishEdit {
        doc_id: String,
        #[snafu(source(from(anyhow::Error, Box::new)))]
        source: Box<anyhow::Error>,
    },
}

/// Local sink for edits arriving off the bus.
///
/// The session layer implements this to forward a broadcast edit to
/// the clients of this instance that are subscribed to its document.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, edit: Edit) -> Result<()>;
}

/// Publishes persisted edits to their per-document topics.
#[derive(Clone)]
pub struct FanoutPublisher {
    bus: Arc<dyn EditBus>,
}

impl FanoutPublisher {
    pub fn new(bus: Arc<dyn EditBus>) -> Self {
        Self { bus }
    }

    /// Serialize one durable edit and broadcast it.
    ///
    /// Only call this after the edit has been persisted; subscribers
    /// treat everything off the bus as authoritative history.
    pub async fn publish_edit(&self, edit: &Edit) -> Result<(), FanoutError> {
        let payload = serde_json::to_vec(edit).context(SerializeEditSnafu {
            doc_id: edit.doc_id.clone(),
        })?;
        self.bus
            .publish(BusMessage {
                topic: doc_topic(&edit.doc_id),
                payload,
            })
            .await
            .context(PublishEditSnafu {
                doc_id: edit.doc_id.clone(),
            })?;
        debug!(doc_id = %edit.doc_id, seq = edit.seq, "published edit");
        Ok(())
    }
}

/// Per-instance bus consumer feeding the local [`Delivery`] sink.
pub struct FanoutSubscriber {
    bus: Arc<dyn EditBus>,
    sink: Arc<dyn Delivery>,
}

impl FanoutSubscriber {
    pub fn new(bus: Arc<dyn EditBus>, sink: Arc<dyn Delivery>) -> Self {
        Self { bus, sink }
    }

    /// Consume bus messages until `shutdown` fires or the bus closes.
    ///
    /// Malformed payloads are logged and dropped; a lagged receiver
    /// logs the number of skipped messages and keeps going, since
    /// reconciliation downstream repairs any missed fan-out.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut receiver = self.bus.subscribe();
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("fan-out subscriber stopping");
                    return;
                }
                received = receiver.recv() => match received {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "fan-out subscriber lagged, dropping backlog");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        info!("edit bus closed, fan-out subscriber stopping");
                        return;
                    }
                },
            };

            let edit: Edit = match serde_json::from_slice(&message.payload) {
                Ok(edit) => edit,
                Err(error) => {
                    warn!(topic = %message.topic, %error, "dropping malformed bus payload");
                    continue;
                }
            };

            if let Err(error) = self.sink.deliver(edit).await {
                warn!(topic = %message.topic, %error, "local delivery failed");
            }
        }
    }
}
