//! Topic bridge controller.
//!
//! Attaching a connection to a topic evicts whatever was bridged before and
//! starts a pump for the new one. Latest connection wins.

use std::sync::Arc;

use meshbridge_core::TopicId;

use crate::connection::{Connection, ConnectionId};
use crate::error::RegistryError;
use crate::pump;
use crate::topic::{Topic, TopicRegistry};

#[derive(Clone)]
pub struct Bridge {
    registry: Arc<TopicRegistry>,
    welcome: bool,
}

impl Bridge {
    /// `welcome` controls the greeting frame sent when a socket is bridged.
    pub fn new(registry: Arc<TopicRegistry>, welcome: bool) -> Self {
        Self { registry, welcome }
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Get or create the topic. The returned handle finishes the bridge once
    /// the caller has a connection, e.g. after a WebSocket upgrade.
    pub async fn join(&self, id: &TopicId) -> Result<PendingBridge, RegistryError> {
        let topic = self.registry.get_or_create(id).await?;
        Ok(PendingBridge {
            bridge: self.clone(),
            topic,
        })
    }

    /// Install `conn` as the topic's active connection and spawn its pump.
    /// Returns without waiting for the pump.
    pub async fn attach(&self, topic: Arc<Topic>, conn: Connection) -> ConnectionId {
        let id = conn.id();
        if let Some(previous) = topic.install(conn.handle()).await {
            tracing::info!(topic = %topic.id(), closed = %previous, conn = %id, "replaced active connection");
        } else {
            tracing::info!(topic = %topic.id(), conn = %id, "connection bridged");
        }
        tokio::spawn(pump::run(conn, topic, self.welcome));
        id
    }

    pub async fn join_and_bridge(
        &self,
        id: &TopicId,
        conn: Connection,
    ) -> Result<ConnectionId, RegistryError> {
        Ok(self.join(id).await?.attach(conn).await)
    }
}

/// A joined topic waiting for its connection.
pub struct PendingBridge {
    bridge: Bridge,
    topic: Arc<Topic>,
}

impl PendingBridge {
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    pub async fn attach(self, conn: Connection) -> ConnectionId {
        self.bridge.attach(self.topic, conn).await
    }
}
