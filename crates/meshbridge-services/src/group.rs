//! Group-messaging contract.
//!
//! The bridge only sees these traits: a `GroupService` that can join a
//! topic, and the `GroupHandle` the join returns. `Mesh` is the networked
//! implementation; tests plug in their own.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use meshbridge_core::{NodeId, TopicId};

use crate::error::GroupError;

/// Messages buffered per subscriber before it starts lagging.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// One message delivered to a topic.
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub topic: TopicId,
    /// Node that published the message.
    pub origin: NodeId,
    pub data: Bytes,
}

#[async_trait]
pub trait GroupService: Send + Sync {
    /// Join `topic`. Called at most once per topic by the registry.
    async fn join(&self, topic: &TopicId) -> Result<Arc<dyn GroupHandle>, GroupError>;
}

#[async_trait]
pub trait GroupHandle: Send + Sync {
    fn topic(&self) -> &TopicId;

    fn subscribe(&self) -> Result<Subscription, GroupError>;

    async fn publish(&self, data: Bytes) -> Result<(), GroupError>;

    /// Remote nodes currently subscribed to this topic.
    fn peers(&self) -> Vec<NodeId>;
}

/// A live subscription. Dropping it (or calling `cancel`) releases it.
pub struct Subscription {
    topic: TopicId,
    rx: broadcast::Receiver<GroupMessage>,
}

impl Subscription {
    pub fn new(topic: TopicId, rx: broadcast::Receiver<GroupMessage>) -> Self {
        Self { topic, rx }
    }

    /// Next message. A lagging subscriber skips what it missed and keeps going.
    pub async fn next(&mut self) -> Result<GroupMessage, GroupError> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Ok(msg),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "subscriber lagged, messages dropped");
                }
                Err(RecvError::Closed) => return Err(GroupError::SubscriptionClosed),
            }
        }
    }

    pub fn cancel(self) {}
}

// ── Local fan-out ─────────────────────────────────────────────────────────────

/// In-process delivery: one broadcast channel per topic.
#[derive(Default)]
pub struct LocalBus {
    channels: DashMap<TopicId, broadcast::Sender<GroupMessage>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &TopicId) -> broadcast::Sender<GroupMessage> {
        self.channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &TopicId) -> Subscription {
        Subscription::new(topic.clone(), self.sender(topic).subscribe())
    }

    /// Deliver to every local subscriber of the message's topic.
    /// Returns how many subscribers received it.
    pub fn deliver(&self, msg: GroupMessage) -> usize {
        match self.channels.get(&msg.topic).map(|tx| tx.clone()) {
            Some(tx) => tx.send(msg).unwrap_or(0),
            None => 0,
        }
    }

    pub fn contains(&self, topic: &TopicId) -> bool {
        self.channels.contains_key(topic)
    }

    pub fn topics(&self) -> Vec<TopicId> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Make sure `topic` has a channel so `deliver` reaches later subscribers.
    pub fn open(&self, topic: &TopicId) {
        self.sender(topic);
    }
}
