//! Mesh: direct TCP links between nodes sharing a rendezvous tag.
//!
//! Serves as the group-messaging service for the bridge (one-hop fan-out to
//! subscribed peers) and as the connector for discovery. Each remote node
//! has at most one link. When two connections to the same node race, both
//! ends keep the one with the lower `(initiator, nonce)` key, so a pair of
//! simultaneous dials, or one node dialing two addresses of the other,
//! settles on the same connection everywhere.

mod link;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use meshbridge_core::wire::{PeerFrame, MAX_FRAME_LEN, MAX_PAYLOAD_LEN};
use meshbridge_core::{NodeId, RendezvousTag, TopicId};

use crate::discovery::{DiscoveredPeer, PeerConnector};
use crate::error::{GroupError, PeerConnectError};
use crate::group::{GroupHandle, GroupMessage, GroupService, LocalBus, Subscription};

use link::{FramedStream, LinkKey, PeerLink, RemoteHello, LINK_BUFFER};

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// A linked peer, as reported to the API.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub node_id: NodeId,
    pub addr: SocketAddr,
    /// Remote's own mesh listener port.
    pub listen_port: u16,
    /// True when this node dialed the link.
    pub outbound: bool,
    pub topics: Vec<TopicId>,
}

pub(crate) struct MeshInner {
    node_id: NodeId,
    tag_hash: [u8; 32],
    listen_port: u16,
    pub(crate) bus: LocalBus,
    /// Topics joined on this node.
    subscribed: DashSet<TopicId>,
    pub(crate) links: DashMap<NodeId, PeerLink>,
    /// Addresses with a dial in flight.
    dialing: DashSet<SocketAddr>,
    /// Addresses that turned out to be this node.
    self_addrs: DashSet<SocketAddr>,
    next_serial: AtomicU64,
}

#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

impl Mesh {
    pub fn new(node_id: NodeId, tag: &RendezvousTag, listen_port: u16) -> Self {
        Self {
            inner: Arc::new(MeshInner {
                node_id,
                tag_hash: tag.hash(),
                listen_port,
                bus: LocalBus::new(),
                subscribed: DashSet::new(),
                links: DashMap::new(),
                dialing: DashSet::new(),
                self_addrs: DashSet::new(),
                next_serial: AtomicU64::new(1),
            }),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn listen_port(&self) -> u16 {
        self.inner.listen_port
    }

    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }

    pub fn is_linked(&self, node: &NodeId) -> bool {
        self.inner.links.contains_key(node)
    }

    /// Every linked peer, sorted by node id.
    pub fn links(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .inner
            .links
            .iter()
            .map(|entry| {
                let link = entry.value();
                let mut topics: Vec<TopicId> = link.topics.iter().map(|t| t.clone()).collect();
                topics.sort();
                PeerInfo {
                    node_id: *entry.key(),
                    addr: link.addr,
                    listen_port: link.listen_port,
                    outbound: link.key.initiator == self.inner.node_id,
                    topics,
                }
            })
            .collect();
        peers.sort_by_key(|p| p.node_id);
        peers
    }

    /// Linked peers subscribed to `topic`.
    pub fn peers(&self, topic: &TopicId) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .inner
            .links
            .iter()
            .filter(|entry| entry.value().topics.contains(topic))
            .map(|entry| *entry.key())
            .collect();
        peers.sort();
        peers
    }

    // ── Accept / dial ────────────────────────────────────────────────────────

    /// Accept inbound peer links until shutdown.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            node = %self.inner.node_id.short(),
            addr = ?listener.local_addr().ok(),
            "mesh listening"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("mesh accept loop shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let mesh = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = mesh.accept(stream, addr).await {
                                tracing::debug!(%addr, error = %e, "inbound link rejected");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "mesh accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        self.close_links();
    }

    async fn accept(&self, stream: TcpStream, addr: SocketAddr) -> Result<bool, PeerConnectError> {
        let mut framed = link::framed(stream);
        let hello = self.handshake(&mut framed, addr).await?;
        Ok(self.register(hello, addr, framed, false))
    }

    /// Dial `addr`. `expected` is the node id the caller believes lives there.
    /// `Ok(false)` when a link to that node already exists or a dial to the
    /// address is in flight.
    pub async fn dial(
        &self,
        addr: SocketAddr,
        expected: Option<NodeId>,
    ) -> Result<bool, PeerConnectError> {
        if self.inner.self_addrs.contains(&addr) {
            return Err(PeerConnectError::SelfConnection(addr));
        }
        if !self.inner.dialing.insert(addr) {
            return Ok(false);
        }
        let _dialing = DialGuard {
            set: &self.inner.dialing,
            addr,
        };

        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerConnectError::Timeout(addr))?
            .map_err(|source| PeerConnectError::Dial { addr, source })?;
        let _ = stream.set_nodelay(true);

        let mut framed = link::framed(stream);
        let hello = match self.handshake(&mut framed, addr).await {
            Ok(hello) => hello,
            Err(PeerConnectError::SelfConnection(addr)) => {
                self.inner.self_addrs.insert(addr);
                return Err(PeerConnectError::SelfConnection(addr));
            }
            Err(e) => return Err(e),
        };
        if let Some(expected) = expected {
            if hello.node_id != expected {
                return Err(PeerConnectError::UnexpectedNode {
                    addr,
                    found: hello.node_id,
                });
            }
        }
        Ok(self.register(hello, addr, framed, true))
    }

    async fn handshake(
        &self,
        framed: &mut FramedStream,
        addr: SocketAddr,
    ) -> Result<RemoteHello, PeerConnectError> {
        link::handshake(
            framed,
            self.inner.node_id,
            self.inner.tag_hash,
            self.inner.listen_port,
            rand::random(),
            addr,
        )
        .await
    }

    /// Install a handshaken link and start its task. Returns false when the
    /// link lost to an existing one and was dropped.
    fn register(
        &self,
        hello: RemoteHello,
        addr: SocketAddr,
        framed: FramedStream,
        outbound: bool,
    ) -> bool {
        let remote = hello.node_id;
        let key = if outbound {
            LinkKey {
                initiator: self.inner.node_id,
                nonce: hello.local_nonce,
            }
        } else {
            LinkKey {
                initiator: remote,
                nonce: hello.nonce,
            }
        };
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(LINK_BUFFER);
        let topics = Arc::new(DashSet::new());
        let token = CancellationToken::new();

        let link = PeerLink {
            serial,
            addr,
            key,
            listen_port: hello.listen_port,
            tx: tx.clone(),
            topics: topics.clone(),
            token: token.clone(),
        };

        match self.inner.links.entry(remote) {
            Entry::Occupied(mut existing) => {
                if existing.get().key <= key {
                    tracing::debug!(peer = %remote.short(), %addr, "duplicate link dropped");
                    return false;
                }
                tracing::debug!(peer = %remote.short(), %addr, "replacing link with lower key");
                existing.get().token.cancel();
                existing.insert(link);
            }
            Entry::Vacant(slot) => {
                slot.insert(link);
            }
        }

        // After the insert, so a concurrent join either sees this link or is
        // in the snapshot.
        for topic in self.inner.subscribed.iter() {
            if let Some(frame) = subscribe_frame(&topic) {
                let _ = tx.try_send(frame);
            }
        }

        tracing::info!(
            peer = %remote.short(),
            %addr,
            outbound,
            serial,
            "peer linked"
        );
        tokio::spawn(link::run(
            self.inner.clone(),
            remote,
            serial,
            framed,
            rx,
            topics,
            token,
        ));
        true
    }

    fn close_links(&self) {
        for entry in self.inner.links.iter() {
            entry.value().token.cancel();
        }
    }

    // ── Group messaging ──────────────────────────────────────────────────────

    fn subscribe_topic(&self, topic: &TopicId) {
        self.inner.bus.open(topic);
        if !self.inner.subscribed.insert(topic.clone()) {
            return;
        }
        let Some(frame) = subscribe_frame(topic) else {
            return;
        };
        let links: Vec<(NodeId, mpsc::Sender<Bytes>)> = self
            .inner
            .links
            .iter()
            .map(|e| (*e.key(), e.value().tx.clone()))
            .collect();
        for (peer, tx) in links {
            if tx.try_send(frame.clone()).is_err() {
                tracing::warn!(peer = %peer.short(), %topic, "link queue full, subscribe dropped");
            }
        }
    }

    /// Deliver to local subscribers, then forward to subscribed peers.
    /// Returns the number of peers the message was queued for. A message
    /// too large for a peer frame is refused outright, so it can never
    /// reach the codec and take a link down.
    pub fn publish(&self, topic: &TopicId, data: Bytes) -> Result<usize, GroupError> {
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(GroupError::Publish(format!(
                "message of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        let frame = PeerFrame::Publish {
            topic: topic.as_str().to_string(),
            origin: self.inner.node_id,
            data: data.clone(),
        }
        .encode()
        .map_err(|e| GroupError::Publish(e.to_string()))?;
        if frame.len() > MAX_FRAME_LEN {
            return Err(GroupError::Publish(format!(
                "frame of {} bytes exceeds the {} byte limit",
                frame.len(),
                MAX_FRAME_LEN
            )));
        }

        self.inner.bus.deliver(GroupMessage {
            topic: topic.clone(),
            origin: self.inner.node_id,
            data,
        });

        let targets: Vec<(NodeId, mpsc::Sender<Bytes>)> = self
            .inner
            .links
            .iter()
            .filter(|e| e.value().topics.contains(topic))
            .map(|e| (*e.key(), e.value().tx.clone()))
            .collect();

        let mut sent = 0;
        for (peer, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(_) => {
                    tracing::warn!(peer = %peer.short(), %topic, "link queue full, message dropped")
                }
            }
        }
        Ok(sent)
    }
}

fn subscribe_frame(topic: &TopicId) -> Option<Bytes> {
    let frame = PeerFrame::Subscribe {
        topic: topic.as_str().to_string(),
    };
    match frame.encode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(%topic, error = %e, "subscribe encode failed");
            None
        }
    }
}

struct DialGuard<'a> {
    set: &'a DashSet<SocketAddr>,
    addr: SocketAddr,
}

impl Drop for DialGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.addr);
    }
}

// ── GroupService ──────────────────────────────────────────────────────────────

pub struct MeshGroup {
    topic: TopicId,
    mesh: Mesh,
}

#[async_trait]
impl GroupService for Mesh {
    async fn join(&self, topic: &TopicId) -> Result<Arc<dyn GroupHandle>, GroupError> {
        self.subscribe_topic(topic);
        Ok(Arc::new(MeshGroup {
            topic: topic.clone(),
            mesh: self.clone(),
        }))
    }
}

#[async_trait]
impl GroupHandle for MeshGroup {
    fn topic(&self) -> &TopicId {
        &self.topic
    }

    fn subscribe(&self) -> Result<Subscription, GroupError> {
        Ok(self.mesh.inner.bus.subscribe(&self.topic))
    }

    async fn publish(&self, data: Bytes) -> Result<(), GroupError> {
        self.mesh.publish(&self.topic, data).map(|_| ())
    }

    fn peers(&self) -> Vec<NodeId> {
        self.mesh.peers(&self.topic)
    }
}

// ── PeerConnector ─────────────────────────────────────────────────────────────

#[async_trait]
impl PeerConnector for Mesh {
    fn local_id(&self) -> NodeId {
        self.inner.node_id
    }

    fn is_local(&self, peer: &DiscoveredPeer) -> bool {
        if peer.id == Some(self.inner.node_id) {
            return true;
        }
        !peer.addrs.is_empty() && peer.addrs.iter().all(|a| self.inner.self_addrs.contains(a))
    }

    async fn connect(&self, peer: &DiscoveredPeer) -> Result<bool, PeerConnectError> {
        if let Some(id) = peer.id {
            if self.is_linked(&id) {
                return Ok(false);
            }
        }

        let mut last_err = PeerConnectError::NoAddress;
        for addr in &peer.addrs {
            match self.dial(*addr, peer.id).await {
                Ok(linked) => return Ok(linked),
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "dial attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::discovery::DiscoverySource;

    const A: NodeId = NodeId::from_bytes([1u8; 32]);
    const B: NodeId = NodeId::from_bytes([2u8; 32]);

    async fn node(id: NodeId, tag: &str) -> (Mesh, SocketAddr, broadcast::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mesh = Mesh::new(id, &RendezvousTag::new(tag), addr.port());
        let (tx, rx) = broadcast::channel(1);
        let server = mesh.clone();
        tokio::spawn(async move { server.serve(listener, rx).await });
        (mesh, addr, tx)
    }

    async fn node_on(id: NodeId, bind: &str) -> (Mesh, u16, broadcast::Sender<()>) {
        let listener = TcpListener::bind(bind).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mesh = Mesh::new(id, &RendezvousTag::new("myspace"), port);
        let (tx, rx) = broadcast::channel(1);
        let server = mesh.clone();
        tokio::spawn(async move { server.serve(listener, rx).await });
        (mesh, port, tx)
    }

    /// Read until `want` arrives; other messages are skipped.
    async fn wait_for_data(sub: &mut Subscription, want: &'static str) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if sub.next().await.unwrap().data == want {
                    return;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{want} never arrived"));
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn dial_links_both_sides_once() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (b, b_addr, _tb) = node(B, "myspace").await;

        assert!(a.dial(b_addr, None).await.unwrap());
        wait_for(|| b.is_linked(&A)).await;

        // Already linked: the handshake completes but the link is dropped.
        assert!(!a.dial(b_addr, None).await.unwrap());
        let peer = DiscoveredPeer::new(Some(B), vec![b_addr], DiscoverySource::Local);
        assert!(!a.connect(&peer).await.unwrap());

        assert_eq!(a.link_count(), 1);
        assert_eq!(b.link_count(), 1);
        assert!(a.links()[0].outbound);
        assert!(!b.links()[0].outbound);
    }

    #[tokio::test]
    async fn dialing_self_is_detected_and_remembered() {
        let (a, a_addr, _ta) = node(A, "myspace").await;

        let err = a.dial(a_addr, None).await.unwrap_err();
        assert!(matches!(err, PeerConnectError::SelfConnection(_)));
        assert_eq!(a.link_count(), 0);

        let peer = DiscoveredPeer::new(None, vec![a_addr], DiscoverySource::Dht);
        assert!(a.is_local(&peer));
    }

    #[tokio::test]
    async fn different_tag_is_rejected() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (_b, b_addr, _tb) = node(B, "elsewhere").await;

        let err = a.dial(b_addr, None).await.unwrap_err();
        assert!(matches!(err, PeerConnectError::TagMismatch(_)));
        assert_eq!(a.link_count(), 0);
    }

    #[tokio::test]
    async fn unexpected_node_is_rejected() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (_b, b_addr, _tb) = node(B, "myspace").await;

        let other = NodeId::from_bytes([9u8; 32]);
        let err = a.dial(b_addr, Some(other)).await.unwrap_err();
        assert!(matches!(err, PeerConnectError::UnexpectedNode { found, .. } if found == B));
    }

    #[tokio::test]
    async fn simultaneous_dials_keep_one_link() {
        let (a, a_addr, _ta) = node(A, "myspace").await;
        let (b, b_addr, _tb) = node(B, "myspace").await;

        let (ra, rb) = tokio::join!(a.dial(b_addr, None), b.dial(a_addr, None));
        ra.unwrap();
        rb.unwrap();

        wait_for(|| a.link_count() == 1 && b.link_count() == 1).await;
        // A has the lower id, so A's outbound connection survives.
        wait_for(|| a.links().first().map(|p| p.outbound) == Some(true)).await;
        wait_for(|| b.links().first().map(|p| p.outbound) == Some(false)).await;
    }

    #[tokio::test]
    async fn publish_reaches_subscribed_peer_and_local_subscribers() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (b, b_addr, _tb) = node(B, "myspace").await;
        let topic = TopicId::new("room-a").unwrap();

        let ga = a.join(&topic).await.unwrap();
        let gb = b.join(&topic).await.unwrap();
        let mut sub_a = ga.subscribe().unwrap();
        let mut sub_b = gb.subscribe().unwrap();

        a.dial(b_addr, None).await.unwrap();
        wait_for(|| ga.peers() == vec![B] && gb.peers() == vec![A]).await;

        ga.publish(Bytes::from_static(b"hi")).await.unwrap();

        let local = sub_a.next().await.unwrap();
        assert_eq!(local.data, "hi");
        assert_eq!(local.origin, A);
        let remote = tokio::time::timeout(Duration::from_secs(2), sub_b.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote.data, "hi");
        assert_eq!(remote.origin, A);
    }

    #[tokio::test]
    async fn unsubscribed_peer_receives_nothing() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (b, b_addr, _tb) = node(B, "myspace").await;
        let topic = TopicId::new("room-a").unwrap();

        let ga = a.join(&topic).await.unwrap();
        a.dial(b_addr, None).await.unwrap();
        wait_for(|| b.is_linked(&A)).await;

        assert!(ga.peers().is_empty());
        assert_eq!(a.publish(&topic, Bytes::from_static(b"nobody")).unwrap(), 0);
    }

    #[tokio::test]
    async fn link_is_removed_when_peer_shuts_down() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (b, b_addr, tb) = node(B, "myspace").await;

        a.dial(b_addr, None).await.unwrap();
        wait_for(|| b.is_linked(&A)).await;

        tb.send(()).unwrap();
        wait_for(|| !a.is_linked(&B)).await;
    }

    #[tokio::test]
    async fn dialing_two_addresses_of_one_peer_settles_on_one_link() {
        for _ in 0..20 {
            let (a, _, _ta) = node(A, "myspace").await;
            let (b, port, _tb) = node_on(B, "0.0.0.0:0").await;
            let topic = TopicId::new("room-a").unwrap();
            let ga = a.join(&topic).await.unwrap();
            let gb = b.join(&topic).await.unwrap();
            let mut sub_b = gb.subscribe().unwrap();

            let first = SocketAddr::from(([127, 0, 0, 1], port));
            let second = SocketAddr::from(([127, 0, 0, 2], port));
            let (r1, r2) = tokio::join!(a.dial(first, Some(B)), a.dial(second, Some(B)));
            let reported = matches!(r1, Ok(true)) || matches!(r2, Ok(true));
            assert!(reported, "neither dial reported a link: {r1:?} {r2:?}");

            wait_for(|| a.link_count() == 1 && b.link_count() == 1).await;
            // Let the losing connection finish closing on both ends.
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(a.is_linked(&B));
            assert!(b.is_linked(&A));

            wait_for(|| ga.peers() == vec![B]).await;
            ga.publish(Bytes::from_static(b"over the survivor")).await.unwrap();
            wait_for_data(&mut sub_b, "over the survivor").await;
        }
    }

    #[tokio::test]
    async fn oversized_publish_is_refused_and_link_survives() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (b, b_addr, _tb) = node(B, "myspace").await;
        let topic = TopicId::new("room-a").unwrap();

        let ga = a.join(&topic).await.unwrap();
        let gb = b.join(&topic).await.unwrap();
        let mut sub_b = gb.subscribe().unwrap();
        a.dial(b_addr, None).await.unwrap();
        wait_for(|| ga.peers() == vec![B]).await;

        let big = Bytes::from(vec![0u8; 2 * 1024 * 1024]);
        assert!(matches!(ga.publish(big).await, Err(GroupError::Publish(_))));

        // The largest accepted payload still fits the peer codec.
        let largest = Bytes::from(vec![1u8; MAX_PAYLOAD_LEN]);
        ga.publish(largest).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), sub_b.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.data.len(), MAX_PAYLOAD_LEN);

        ga.publish(Bytes::from_static(b"small")).await.unwrap();
        wait_for_data(&mut sub_b, "small").await;
        assert_eq!(a.link_count(), 1);
        assert_eq!(b.link_count(), 1);
    }

    #[tokio::test]
    async fn heavy_traffic_both_ways_keeps_links_moving() {
        let (a, _, _ta) = node(A, "myspace").await;
        let (b, b_addr, _tb) = node(B, "myspace").await;
        let topic = TopicId::new("flood").unwrap();

        let ga = a.join(&topic).await.unwrap();
        let gb = b.join(&topic).await.unwrap();
        let mut sub_a = ga.subscribe().unwrap();
        let mut sub_b = gb.subscribe().unwrap();
        a.dial(b_addr, None).await.unwrap();
        wait_for(|| ga.peers() == vec![B] && gb.peers() == vec![A]).await;

        // Far more than both socket buffers hold, sent from both ends at once.
        let chunk = Bytes::from(vec![7u8; 64 * 1024]);
        for _ in 0..400 {
            a.publish(&topic, chunk.clone()).unwrap();
            b.publish(&topic, chunk.clone()).unwrap();
        }
        a.publish(&topic, Bytes::from_static(b"done-a")).unwrap();
        b.publish(&topic, Bytes::from_static(b"done-b")).unwrap();

        wait_for_data(&mut sub_b, "done-a").await;
        wait_for_data(&mut sub_a, "done-b").await;
        assert!(a.is_linked(&B) && b.is_linked(&A));
    }
}
