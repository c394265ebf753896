//! Multicast announcement listener.
//!
//! Joins the group and turns every valid announcement for our tag into a
//! `DiscoveredPeer`. The reader task ends on a socket error, which closes
//! the channel and lets the discovery loop re-arm the listener.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use meshbridge_core::wire::Announcement;
use meshbridge_core::RendezvousTag;
use meshbridge_services::{DiscoveredPeer, DiscoveryError, DiscoverySource, LocalDiscovery};

use super::{make_listener_socket, MulticastGroup};

const PEER_QUEUE: usize = 64;

pub struct MulticastDiscovery {
    group: MulticastGroup,
}

impl MulticastDiscovery {
    pub fn new(group: MulticastGroup) -> Self {
        Self { group }
    }
}

#[async_trait]
impl LocalDiscovery for MulticastDiscovery {
    async fn listen(
        &self,
        tag: &RendezvousTag,
    ) -> Result<mpsc::Receiver<DiscoveredPeer>, DiscoveryError> {
        let socket = make_listener_socket(self.group)
            .and_then(|s| Ok(UdpSocket::from_std(s)?))
            .map_err(|e| DiscoveryError::Listener(format!("{e:#}")))?;

        let (tx, rx) = mpsc::channel(PEER_QUEUE);
        let tag_hash = tag.hash();
        tracing::info!(group = %self.group.dest(), "multicast listener joined");
        tokio::spawn(read_loop(socket, tag_hash, tx));
        Ok(rx)
    }
}

async fn read_loop(socket: UdpSocket, tag_hash: [u8; 32], tx: mpsc::Sender<DiscoveredPeer>) {
    let mut buf = vec![0u8; 512];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "multicast recv failed");
                return;
            }
        };

        let Some(peer) = parse_announcement(&buf[..len], from, &tag_hash) else {
            continue;
        };
        if tx.send(peer).await.is_err() {
            // Discovery loop is gone.
            return;
        }
    }
}

/// Validate a datagram and build the peer it announces.
pub(crate) fn parse_announcement(
    buf: &[u8],
    from: SocketAddr,
    tag_hash: &[u8; 32],
) -> Option<DiscoveredPeer> {
    let Some(announcement) = Announcement::parse(buf) else {
        tracing::trace!(%from, "ignoring malformed announcement");
        return None;
    };
    let remote_tag = announcement.tag_hash; // copy out of the packed struct
    if &remote_tag != tag_hash {
        tracing::trace!(%from, "ignoring announcement for another tag");
        return None;
    }

    let node_id = announcement.node_id();
    let addr = SocketAddr::new(from.ip(), announcement.mesh_port());
    tracing::debug!(peer = %node_id.short(), %addr, "local peer announced");
    Some(DiscoveredPeer::new(
        Some(node_id),
        vec![addr],
        DiscoverySource::Local,
    ))
}
