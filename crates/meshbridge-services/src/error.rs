//! Error taxonomy for the bridge and discovery layers.
//!
//! Only `RegistryError` ever reaches a caller. Everything else terminates a
//! pump, a link, or a single connect attempt and is logged where it happens.

use std::net::SocketAddr;

use meshbridge_core::wire::WireError;
use meshbridge_core::{NodeId, TopicId};

/// Failure inside the group-messaging service.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("failed to join group {topic}: {reason}")]
    Join { topic: TopicId, reason: String },
    #[error("subscription closed")]
    SubscriptionClosed,
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Returned by the topic registry. Surfaced to the HTTP caller.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("could not join group for topic {topic}")]
    GroupJoin {
        topic: TopicId,
        #[source]
        source: GroupError,
    },
}

/// Read/write/subscription failure on a bridged connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionIoError {
    #[error("connection closed")]
    Closed,
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
}

/// A discovered peer could not be linked.
#[derive(Debug, thiserror::Error)]
pub enum PeerConnectError {
    #[error("peer has no reachable address")]
    NoAddress,
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("dial {0} timed out")]
    Timeout(SocketAddr),
    #[error("handshake with {addr} failed: {reason}")]
    Handshake { addr: SocketAddr, reason: String },
    #[error("{0} advertises a different rendezvous tag")]
    TagMismatch(SocketAddr),
    #[error("{0} is this node")]
    SelfConnection(SocketAddr),
    #[error("unexpected node {found:?} at {addr}")]
    UnexpectedNode { addr: SocketAddr, found: NodeId },
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Discovery-layer failures. Only `RoutingInit` stops a strategy.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("routing table initialization failed: {0}")]
    RoutingInit(String),
    #[error("bootstrap seed {seed} unreachable: {source}")]
    BootstrapSeed {
        seed: String,
        #[source]
        source: PeerConnectError,
    },
    #[error("advertise failed: {0}")]
    Advertise(String),
    #[error("peer search failed: {0}")]
    Search(String),
    #[error("local discovery listener failed: {0}")]
    Listener(String),
}
