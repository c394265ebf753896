//! DHT discovery loop.
//!
//! Bootstrapping → Advertising → Searching. Bootstrap starts the routing
//! table and dials the configured seed peers in parallel. The search loop
//! then re-advertises, queries the tag, and connects to every address it
//! gets back, once per `search_interval`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use meshbridge_core::RendezvousTag;

use super::{connect_if_not_self, DiscoveredPeer, DiscoverySource, PeerConnector};
use crate::error::{DiscoveryError, PeerConnectError};

/// The distributed routing table. The daemon backs this with `mainline`.
#[async_trait]
pub trait RoutingTable: Send + Sync {
    async fn start(&self) -> Result<(), DiscoveryError>;

    /// Announce `port` under `tag`.
    async fn advertise(&self, tag: &RendezvousTag, port: u16) -> Result<(), DiscoveryError>;

    /// Addresses announced under `tag`. May include this node.
    async fn search(&self, tag: &RendezvousTag) -> Result<Vec<SocketAddr>, DiscoveryError>;
}

#[derive(Debug, Clone)]
pub struct DhtSettings {
    /// `host:port` of other nodes' peer link listeners.
    pub seeds: Vec<String>,
    /// Port advertised under the tag.
    pub mesh_port: u16,
    pub search_interval: Duration,
    pub stop_after_first_connect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtPhase {
    Bootstrapping,
    Advertising,
    Searching,
    Done,
}

pub struct DhtDiscovery {
    routing: Arc<dyn RoutingTable>,
    connector: Arc<dyn PeerConnector>,
    tag: RendezvousTag,
    settings: DhtSettings,
    phase: DhtPhase,
    shutdown: broadcast::Receiver<()>,
}

impl DhtDiscovery {
    pub fn new(
        routing: Arc<dyn RoutingTable>,
        connector: Arc<dyn PeerConnector>,
        tag: RendezvousTag,
        settings: DhtSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            routing,
            connector,
            tag,
            settings,
            phase: DhtPhase::Bootstrapping,
            shutdown,
        }
    }

    pub fn phase(&self) -> DhtPhase {
        self.phase
    }

    /// Start the routing table and dial every seed in parallel.
    /// Returns how many seeds were reached. Only routing-table failure is an error.
    pub async fn bootstrap(&mut self) -> Result<usize, DiscoveryError> {
        self.phase = DhtPhase::Bootstrapping;
        self.routing.start().await?;

        let mut dials = JoinSet::new();
        for seed in self.settings.seeds.clone() {
            let connector = self.connector.clone();
            dials.spawn(async move { dial_seed(connector.as_ref(), seed).await });
        }

        let mut reached = 0;
        while let Some(result) = dials.join_next().await {
            match result {
                Ok(Ok(())) => reached += 1,
                Ok(Err(e)) => tracing::warn!(error = %e, "bootstrap seed failed, continuing"),
                Err(e) => tracing::warn!(error = %e, "bootstrap seed task panicked"),
            }
        }

        tracing::info!(
            seeds = self.settings.seeds.len(),
            reached,
            "dht bootstrap complete"
        );
        Ok(reached)
    }

    async fn advertise(&mut self) {
        if let Err(e) = self.routing.advertise(&self.tag, self.settings.mesh_port).await {
            tracing::warn!(tag = %self.tag, error = %e, "dht advertise failed");
        } else {
            tracing::debug!(tag = %self.tag, port = self.settings.mesh_port, "advertised on dht");
        }
    }

    /// One search. Returns the number of new links.
    pub async fn search_round(&mut self) -> usize {
        let addrs = match self.routing.search(&self.tag).await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!(tag = %self.tag, error = %e, "dht search failed");
                return 0;
            }
        };
        tracing::debug!(tag = %self.tag, found = addrs.len(), "dht search round");

        let mut linked = 0;
        for addr in addrs {
            let peer = DiscoveredPeer::new(None, vec![addr], DiscoverySource::Dht);
            if connect_if_not_self(self.connector.as_ref(), &peer).await {
                linked += 1;
            }
        }
        linked
    }

    /// Run until shutdown, or until the first new link when
    /// `stop_after_first_connect` is set.
    pub async fn run(mut self) -> Result<(), DiscoveryError> {
        if let Err(e) = self.bootstrap().await {
            tracing::error!(error = %e, "dht discovery disabled");
            self.phase = DhtPhase::Done;
            return Err(e);
        }

        self.phase = DhtPhase::Advertising;
        self.advertise().await;

        self.phase = DhtPhase::Searching;
        loop {
            let linked = self.search_round().await;
            if linked > 0 && self.settings.stop_after_first_connect {
                tracing::info!(linked, "dht search stopped after first connection");
                break;
            }

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("dht discovery shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.settings.search_interval) => {}
            }
            self.advertise().await;
        }

        self.phase = DhtPhase::Done;
        Ok(())
    }
}

async fn dial_seed(connector: &dyn PeerConnector, seed: String) -> Result<(), DiscoveryError> {
    let addrs: Vec<SocketAddr> = match tokio::net::lookup_host(seed.as_str()).await {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            tracing::debug!(%seed, error = %e, "seed did not resolve");
            Vec::new()
        }
    };
    if addrs.is_empty() {
        return Err(DiscoveryError::BootstrapSeed {
            seed,
            source: PeerConnectError::NoAddress,
        });
    }

    let peer = DiscoveredPeer::new(None, addrs, DiscoverySource::Seed);
    if connector.is_local(&peer) {
        return Ok(());
    }
    match connector.connect(&peer).await {
        Ok(_) => Ok(()),
        Err(source) => Err(DiscoveryError::BootstrapSeed { seed, source }),
    }
}
