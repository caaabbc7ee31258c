use std::sync::{Arc, RwLock, PoisonError};

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::PublishError;
use crate::ping::Snapshot;

pub const UPDATE_EVENT: &str = "update";
const CHANNEL_CAPACITY: usize = 16;

/// Receives one snapshot per scheduling cycle.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Returns how many observers the snapshot reached.
    async fn publish(&self, snapshot: &Snapshot) -> Result<usize, PublishError>;
}

#[derive(Serialize)]
struct UpdateMessage<'a> {
    #[serde(rename = "type")]
    event: &'static str,
    data: &'a Snapshot,
}

pub fn encode_update(snapshot: &Snapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&UpdateMessage { event: UPDATE_EVENT, data: snapshot })
}

/// Fans JSON-encoded snapshots out to every subscribed observer.
///
/// The latest message is retained so an observer that connects between
/// cycles is not left empty-handed until the next publish.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<Arc<str>>,
    latest: Arc<RwLock<Option<Arc<str>>>>,
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx, latest: Arc::new(RwLock::new(None)) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<str>> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl BroadcastSink for ChannelSink {
    async fn publish(&self, snapshot: &Snapshot) -> Result<usize, PublishError> {
        let message: Arc<str> = encode_update(snapshot)?.into();
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(message.clone());

        // No observers connected is not a failure.
        let delivered = self.tx.send(message).unwrap_or(0);
        debug!("published snapshot of {} hosts to {delivered} observers", snapshot.len());
        Ok(delivered)
    }
}
