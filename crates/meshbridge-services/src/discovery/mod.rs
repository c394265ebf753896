//! Peer discovery.
//!
//! Two strategies run side by side: `dht` (routing-table search for the
//! rendezvous tag) and `local` (multicast announcements on the segment).
//! Both hand what they find to the same `connect_if_not_self`.

pub mod dht;
pub mod local;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use meshbridge_core::NodeId;

use crate::error::PeerConnectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Dht,
    Local,
    Seed,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscoverySource::Dht => "dht",
            DiscoverySource::Local => "local",
            DiscoverySource::Seed => "seed",
        })
    }
}

/// A peer found by a discovery strategy. Consumed by one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Known for local announcements; the DHT only yields addresses.
    pub id: Option<NodeId>,
    pub addrs: Vec<SocketAddr>,
    pub source: DiscoverySource,
}

impl DiscoveredPeer {
    pub fn new(id: Option<NodeId>, addrs: Vec<SocketAddr>, source: DiscoverySource) -> Self {
        Self { id, addrs, source }
    }
}

/// Something that can establish a link to a discovered peer.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    fn local_id(&self) -> NodeId;

    /// True when `peer` is known to be this node, by id or by an address
    /// previously found to loop back.
    fn is_local(&self, peer: &DiscoveredPeer) -> bool;

    /// `Ok(true)` for a new link, `Ok(false)` when already linked.
    async fn connect(&self, peer: &DiscoveredPeer) -> Result<bool, PeerConnectError>;
}

/// Connect to `peer` unless it is this node. Returns true only when a new
/// link was established; every failure is logged here.
pub async fn connect_if_not_self(connector: &dyn PeerConnector, peer: &DiscoveredPeer) -> bool {
    if connector.is_local(peer) {
        tracing::trace!(source = %peer.source, "skipping self");
        return false;
    }
    match connector.connect(peer).await {
        Ok(true) => {
            tracing::info!(source = %peer.source, addrs = ?peer.addrs, "connected to peer");
            true
        }
        Ok(false) => {
            tracing::debug!(source = %peer.source, addrs = ?peer.addrs, "peer already linked");
            false
        }
        Err(PeerConnectError::SelfConnection(addr)) => {
            tracing::debug!(source = %peer.source, %addr, "address loops back to this node");
            false
        }
        Err(e) => {
            tracing::warn!(source = %peer.source, addrs = ?peer.addrs, error = %e, "peer connect failed");
            false
        }
    }
}
