//! Identifiers shared by every meshbridge crate.
//!
//! - `NodeId`: random 32-byte identity generated at startup. Carried in peer
//!   link handshakes and local announcements.
//! - `TopicId`: validated topic name, the registry key.
//! - `RendezvousTag`: the label cooperating nodes discover each other by.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Longest topic name accepted, in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("topic name is empty")]
    EmptyTopic,
    #[error("topic name is {0} bytes, limit is {MAX_TOPIC_LEN}")]
    TopicTooLong(usize),
    #[error("node id must be 64 hex characters")]
    InvalidNodeId,
}

// ── NodeId ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Fresh random identity.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 bytes, hex. Used in log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl FromStr for NodeId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidNodeId)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidNodeId)?;
        Ok(Self(arr))
    }
}

// ── TopicId ───────────────────────────────────────────────────────────────────

/// A topic name. Opaque once constructed; compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId(String);

impl TopicId {
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdError::EmptyTopic);
        }
        if name.len() > MAX_TOPIC_LEN {
            return Err(IdError::TopicTooLong(name.len()));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ── RendezvousTag ─────────────────────────────────────────────────────────────

/// The discovery label shared by cooperating nodes.
///
/// Only the BLAKE3 hash of the tag travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousTag(String);

impl RendezvousTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// BLAKE3 hash of the tag, used in announcements and handshakes.
    pub fn hash(&self) -> [u8; 32] {
        *blake3::hash(self.0.as_bytes()).as_bytes()
    }

    /// 20-byte DHT info-hash: the hash truncated to the DHT key width.
    pub fn info_hash(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out.copy_from_slice(&self.hash()[..20]);
        out
    }
}

impl fmt::Display for RendezvousTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
