//! Local-network discovery loop.
//!
//! Consumes peers from a `LocalDiscovery` listener and connects to each one.
//! A listener that fails or ends is re-armed after `backoff`; the loop only
//! stops on shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use meshbridge_core::RendezvousTag;

use super::{connect_if_not_self, DiscoveredPeer, PeerConnector};
use crate::error::DiscoveryError;

pub const DEFAULT_REARM_BACKOFF: Duration = Duration::from_secs(5);

/// Source of peers announcing themselves on the local segment.
#[async_trait]
pub trait LocalDiscovery: Send + Sync {
    /// Start listening for `tag`. The receiver closing means the listener died.
    async fn listen(&self, tag: &RendezvousTag)
        -> Result<mpsc::Receiver<DiscoveredPeer>, DiscoveryError>;
}

pub struct LocalDiscoveryLoop {
    source: Arc<dyn LocalDiscovery>,
    connector: Arc<dyn PeerConnector>,
    tag: RendezvousTag,
    backoff: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl LocalDiscoveryLoop {
    pub fn new(
        source: Arc<dyn LocalDiscovery>,
        connector: Arc<dyn PeerConnector>,
        tag: RendezvousTag,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            source,
            connector,
            tag,
            backoff: DEFAULT_REARM_BACKOFF,
            shutdown,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(mut self) {
        loop {
            match self.source.listen(&self.tag).await {
                Ok(mut peers) => {
                    tracing::info!(tag = %self.tag, "local discovery listening");
                    loop {
                        tokio::select! {
                            _ = self.shutdown.recv() => {
                                tracing::info!("local discovery shutting down");
                                return;
                            }
                            peer = peers.recv() => match peer {
                                Some(peer) => {
                                    connect_if_not_self(self.connector.as_ref(), &peer).await;
                                }
                                None => {
                                    tracing::warn!("local discovery listener stopped");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "local discovery listener failed"),
            }

            tracing::debug!(backoff_ms = self.backoff.as_millis() as u64, "re-arming local discovery");
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("local discovery shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}
