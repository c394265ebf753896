//! meshbridge integration tests.
//!
//! Every test builds its nodes in-process: each node is a `Mesh` serving a
//! real TCP listener on 127.0.0.1, with a topic registry and bridge on top.
//! Nothing here needs the network beyond loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use meshbridge_core::{NodeId, RendezvousTag, TopicId};
use meshbridge_services::{Bridge, Mesh, RemoteEnd, TopicRegistry};

mod bridging;
mod discovery;
mod links;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TAG: &str = "myspace";

/// One in-process daemon minus the API.
pub struct Node {
    pub id: NodeId,
    pub mesh: Mesh,
    pub addr: SocketAddr,
    pub bridge: Bridge,
    pub shutdown: broadcast::Sender<()>,
}

impl Node {
    pub async fn start(seed: u8) -> Node {
        Node::start_with_tag(seed, TAG).await
    }

    pub async fn start_with_tag(seed: u8, tag: &str) -> Node {
        Node::start_on(seed, tag, "127.0.0.1:0").await
    }

    /// `addr` is the reported listener address, which for a wildcard bind
    /// is rewritten to 127.0.0.1.
    pub async fn start_on(seed: u8, tag: &str, bind: &str) -> Node {
        let id = NodeId::from_bytes([seed; 32]);
        let listener = TcpListener::bind(bind).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let mesh = Mesh::new(id, &RendezvousTag::new(tag), port);

        let (shutdown, rx) = broadcast::channel(1);
        let server = mesh.clone();
        tokio::spawn(async move { server.serve(listener, rx).await });

        let registry = Arc::new(TopicRegistry::new(Arc::new(mesh.clone())));
        let bridge = Bridge::new(registry, true);
        Node {
            id,
            mesh,
            addr,
            bridge,
            shutdown,
        }
    }

    /// Bridge a fresh in-memory client to `topic` and consume the welcome.
    pub async fn client(&self, topic: &str) -> RemoteEnd {
        let id = TopicId::new(topic).unwrap();
        let (conn, mut remote) = meshbridge_services::channel_connection(64);
        self.bridge.join_and_bridge(&id, conn).await.unwrap();
        let welcome = recv(&mut remote).await.expect("welcome frame");
        assert!(welcome.starts_with(b"Welcome to the topic"));
        remote
    }

    /// Remote nodes subscribed to `topic`, as this node sees them.
    pub fn topic_peers(&self, topic: &str) -> Vec<NodeId> {
        let id = TopicId::new(topic).unwrap();
        self.bridge
            .registry()
            .get(&id)
            .map(|t| t.group().peers())
            .unwrap_or_default()
    }
}

/// Next frame from the bridge, or `None` if the socket closed or nothing
/// arrived within two seconds.
pub async fn recv(remote: &mut RemoteEnd) -> Option<Bytes> {
    tokio::time::timeout(Duration::from_secs(2), remote.rx.recv())
        .await
        .ok()
        .flatten()
}

/// True if no frame arrives within `ms`.
pub async fn quiet_for(remote: &mut RemoteEnd, ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), remote.rx.recv())
        .await
        .is_err()
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 3s");
}
