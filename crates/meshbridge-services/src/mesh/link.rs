//! One peer link: handshake, then a read/write loop over framed TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashSet;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use meshbridge_core::wire::{frame_codec, PeerFrame};
use meshbridge_core::{NodeId, TopicId};

use crate::error::PeerConnectError;
use crate::group::GroupMessage;

use super::MeshInner;

pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Frames queued per link before publishes to it are dropped.
pub(crate) const LINK_BUFFER: usize = 1024;

pub(crate) type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Names one TCP connection the same way on both ends: the node that dialed
/// it and the nonce that node sent. Of two connections to the same peer, the
/// lower key survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LinkKey {
    pub initiator: NodeId,
    pub nonce: u64,
}

/// What the mesh keeps for each linked peer.
pub(crate) struct PeerLink {
    pub serial: u64,
    pub addr: SocketAddr,
    pub key: LinkKey,
    /// Remote's mesh listener port, from its Hello.
    pub listen_port: u16,
    /// Encoded frames, sized to fit the codec.
    pub tx: mpsc::Sender<Bytes>,
    /// Topics the remote subscribed to.
    pub topics: Arc<DashSet<TopicId>>,
    pub token: CancellationToken,
}

/// The remote's Hello, once validated.
pub(crate) struct RemoteHello {
    pub node_id: NodeId,
    pub listen_port: u16,
    pub nonce: u64,
    /// The nonce this side sent.
    pub local_nonce: u64,
}

pub(crate) fn framed(stream: TcpStream) -> FramedStream {
    Framed::new(stream, frame_codec())
}

/// Exchange Hello frames. Both sides send first, then read.
pub(crate) async fn handshake(
    framed: &mut FramedStream,
    local: NodeId,
    tag_hash: [u8; 32],
    listen_port: u16,
    nonce: u64,
    addr: SocketAddr,
) -> Result<RemoteHello, PeerConnectError> {
    let exchange = async {
        let hello = PeerFrame::Hello {
            node_id: local,
            tag_hash,
            listen_port,
            nonce,
        };
        framed
            .send(hello.encode()?)
            .await
            .map_err(|e| PeerConnectError::Handshake {
                addr,
                reason: e.to_string(),
            })?;

        let frame = match framed.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                return Err(PeerConnectError::Handshake {
                    addr,
                    reason: e.to_string(),
                })
            }
            None => {
                return Err(PeerConnectError::Handshake {
                    addr,
                    reason: "closed before hello".into(),
                })
            }
        };
        Ok::<_, PeerConnectError>(PeerFrame::decode(&frame)?)
    };

    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange)
        .await
        .map_err(|_| PeerConnectError::Timeout(addr))??;

    match reply {
        PeerFrame::Hello {
            node_id,
            tag_hash: remote_tag,
            listen_port,
            nonce: remote_nonce,
        } => {
            if remote_tag != tag_hash {
                return Err(PeerConnectError::TagMismatch(addr));
            }
            if node_id == local {
                return Err(PeerConnectError::SelfConnection(addr));
            }
            Ok(RemoteHello {
                node_id,
                listen_port,
                nonce: remote_nonce,
                local_nonce: nonce,
            })
        }
        other => Err(PeerConnectError::Handshake {
            addr,
            reason: format!("expected hello, got {other:?}"),
        }),
    }
}

/// Drive a registered link until either side closes or the token fires.
/// Removes the link from the table on exit, unless it has been replaced.
///
/// Reading and writing run side by side: a write stalled on a full peer
/// never stops this side from draining what the peer sends.
pub(crate) async fn run(
    mesh: Arc<MeshInner>,
    remote: NodeId,
    serial: u64,
    framed: FramedStream,
    mut outgoing: mpsc::Receiver<Bytes>,
    topics: Arc<DashSet<TopicId>>,
    token: CancellationToken,
) {
    let (mut sink, mut stream) = framed.split();

    let writer = async {
        loop {
            let bytes = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                b = outgoing.recv() => match b {
                    Some(b) => b,
                    None => break,
                },
            };
            let sent = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                r = sink.send(bytes) => r,
            };
            if let Err(e) = sent {
                tracing::debug!(peer = %remote.short(), error = %e, "link write failed");
                break;
            }
        }
        token.cancel();
    };

    let reader = async {
        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = stream.next() => item,
            };
            let buf = match item {
                Some(Ok(buf)) => buf,
                Some(Err(e)) => {
                    tracing::debug!(peer = %remote.short(), error = %e, "link read failed");
                    break;
                }
                None => break,
            };
            match PeerFrame::decode(&buf) {
                Ok(frame) => handle_frame(&mesh, remote, &topics, frame),
                Err(e) => tracing::warn!(peer = %remote.short(), error = %e, "dropping undecodable frame"),
            }
        }
        token.cancel();
    };

    tokio::join!(writer, reader);

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
    let removed = mesh
        .links
        .remove_if(&remote, |_, link| link.serial == serial)
        .is_some();
    tracing::info!(peer = %remote.short(), serial, removed, "peer link closed");
}

fn handle_frame(mesh: &MeshInner, remote: NodeId, topics: &DashSet<TopicId>, frame: PeerFrame) {
    match frame {
        PeerFrame::Subscribe { topic } => match TopicId::new(topic) {
            Ok(topic) => {
                tracing::debug!(peer = %remote.short(), %topic, "peer subscribed");
                topics.insert(topic);
            }
            Err(e) => tracing::warn!(peer = %remote.short(), error = %e, "bad subscribe"),
        },
        PeerFrame::Publish {
            topic,
            origin,
            data,
        } => match TopicId::new(topic) {
            Ok(topic) => {
                mesh.bus.deliver(GroupMessage {
                    topic,
                    origin,
                    data,
                });
            }
            Err(e) => tracing::warn!(peer = %remote.short(), error = %e, "bad publish"),
        },
        PeerFrame::Hello { .. } => {
            tracing::debug!(peer = %remote.short(), "ignoring repeated hello");
        }
    }
}

