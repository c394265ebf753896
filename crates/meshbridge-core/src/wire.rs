//! meshbridge wire format.
//!
//! Two encodings live here:
//!
//! - `Announcement`: the fixed-size datagram nodes multicast on the local
//!   segment. `#[repr(C, packed)]` with zerocopy derives, so it is parsed
//!   without allocation and without unsafe code.
//! - `PeerFrame`: the messages exchanged over a peer link. MessagePack
//!   encoded, each frame prefixed with a 4-byte big-endian length by
//!   `frame_codec()`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use tokio_util::codec::LengthDelimitedCodec;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::id::NodeId;

/// First four bytes of every announcement.
pub const ANNOUNCE_MAGIC: [u8; 4] = *b"MBRG";

/// Wire format version. A receiver seeing another version drops the datagram.
pub const WIRE_VERSION: u8 = 1;

/// Largest peer frame accepted, in bytes.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Largest message a client may publish. The rest of a frame is envelope:
/// topic, origin and MessagePack field names.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - 4 * 1024;

// ── Announcement ──────────────────────────────────────────────────────────────

/// Local-segment presence announcement.
///
/// Wire size: 72 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Announcement {
    /// Always `ANNOUNCE_MAGIC`.
    pub magic: [u8; 4],
    /// Always `WIRE_VERSION`.
    pub version: u8,
    /// Reserved, must be zero.
    pub flags: u8,
    /// TCP port of the sender's peer link listener, big-endian.
    pub mesh_port: [u8; 2],
    /// BLAKE3 hash of the sender's rendezvous tag.
    pub tag_hash: [u8; 32],
    /// Sender's node id.
    pub node_id: [u8; 32],
}

assert_eq_size!(Announcement, [u8; 72]);

impl Announcement {
    pub fn new(node_id: &NodeId, tag_hash: [u8; 32], mesh_port: u16) -> Self {
        Self {
            magic: ANNOUNCE_MAGIC,
            version: WIRE_VERSION,
            flags: 0,
            mesh_port: mesh_port.to_be_bytes(),
            tag_hash,
            node_id: *node_id.as_bytes(),
        }
    }

    /// Parse a received datagram. Returns `None` for short buffers, foreign
    /// magic, or an unknown version.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let ann = Self::read_from_prefix(buf)?;
        if ann.magic != ANNOUNCE_MAGIC || ann.version != WIRE_VERSION {
            return None;
        }
        Some(ann)
    }

    pub fn mesh_port(&self) -> u16 {
        u16::from_be_bytes(self.mesh_port)
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(self.node_id)
    }
}

// ── Peer frames ───────────────────────────────────────────────────────────────

/// A message on a peer link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerFrame {
    /// First frame in both directions. A link whose tag hash differs, or
    /// whose node id equals the receiver's, is closed.
    Hello {
        node_id: NodeId,
        tag_hash: [u8; 32],
        listen_port: u16,
        /// Fresh per connection. With the dialing node's id it names the
        /// connection identically on both ends.
        nonce: u64,
    },
    /// The sender has joined `topic` and wants its publishes.
    Subscribe { topic: String },
    /// A message published to `topic` by `origin`.
    Publish {
        topic: String,
        origin: NodeId,
        data: Bytes,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl PeerFrame {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(rmp_serde::to_vec_named(self)?))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        Ok(rmp_serde::from_slice(buf)?)
    }
}

/// Length-delimited framing for peer links.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
