//! Discovery driving real links: a shared in-memory routing table stands in
//! for the DHT.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use meshbridge_services::{
    DhtDiscovery, DhtSettings, DiscoveredPeer, DiscoveryError, PeerConnector, RoutingTable,
};

use crate::*;

/// Every node announcing under a tag sees every other, itself included.
#[derive(Default)]
struct SharedTable {
    announced: Mutex<BTreeSet<(String, SocketAddr)>>,
}

#[async_trait]
impl RoutingTable for SharedTable {
    async fn start(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn advertise(&self, tag: &RendezvousTag, port: u16) -> Result<(), DiscoveryError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        self.announced
            .lock()
            .unwrap()
            .insert((tag.as_str().to_string(), addr));
        Ok(())
    }

    async fn search(&self, tag: &RendezvousTag) -> Result<Vec<SocketAddr>, DiscoveryError> {
        Ok(self
            .announced
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == tag.as_str())
            .map(|(_, addr)| *addr)
            .collect())
    }
}

fn settings(node: &Node, seeds: Vec<String>) -> DhtSettings {
    DhtSettings {
        seeds,
        mesh_port: node.addr.port(),
        search_interval: Duration::from_millis(50),
        stop_after_first_connect: false,
    }
}

fn spawn_discovery(node: &Node, table: Arc<SharedTable>, seeds: Vec<String>) {
    let discovery = DhtDiscovery::new(
        table,
        Arc::new(node.mesh.clone()),
        RendezvousTag::new(TAG),
        settings(node, seeds),
        node.shutdown.subscribe(),
    );
    tokio::spawn(discovery.run());
}

#[tokio::test]
async fn three_nodes_form_a_full_mesh() {
    let table = Arc::new(SharedTable::default());
    let nodes = [Node::start(1).await, Node::start(2).await, Node::start(3).await];
    for node in &nodes {
        spawn_discovery(node, table.clone(), Vec::new());
    }

    wait_for(|| nodes.iter().all(|n| n.mesh.link_count() == 2)).await;
    for node in &nodes {
        assert!(!node.mesh.is_linked(&node.id));
        // Each node found its own advertisement and learned to skip it.
        let me = DiscoveredPeer::new(
            None,
            vec![node.addr],
            meshbridge_services::DiscoverySource::Dht,
        );
        wait_for(|| node.mesh.is_local(&me)).await;
    }
}

#[tokio::test]
async fn seed_links_nodes_without_any_advertisement() {
    let a = Node::start(1).await;
    let b = Node::start(2).await;

    // An empty table: only the seed can produce a link.
    struct Empty;
    #[async_trait]
    impl RoutingTable for Empty {
        async fn start(&self) -> Result<(), DiscoveryError> {
            Ok(())
        }
        async fn advertise(&self, _: &RendezvousTag, _: u16) -> Result<(), DiscoveryError> {
            Ok(())
        }
        async fn search(&self, _: &RendezvousTag) -> Result<Vec<SocketAddr>, DiscoveryError> {
            Ok(Vec::new())
        }
    }

    let mut discovery = DhtDiscovery::new(
        Arc::new(Empty),
        Arc::new(a.mesh.clone()),
        RendezvousTag::new(TAG),
        settings(&a, vec![b.addr.to_string(), "127.0.0.1:1".to_string()]),
        a.shutdown.subscribe(),
    );
    assert_eq!(discovery.bootstrap().await.unwrap(), 1);
    wait_for(|| b.mesh.is_linked(&a.id)).await;
}

#[tokio::test]
async fn bridged_message_flows_after_discovery() {
    let table = Arc::new(SharedTable::default());
    let a = Node::start(1).await;
    let b = Node::start(2).await;
    spawn_discovery(&a, table.clone(), Vec::new());
    spawn_discovery(&b, table.clone(), Vec::new());

    let mut alice = a.client("lobby").await;
    let mut bob = b.client("lobby").await;
    wait_for(|| a.topic_peers("lobby") == vec![b.id]).await;

    alice.tx.send(Bytes::from_static(b"found you")).await.unwrap();
    assert_eq!(recv(&mut bob).await.unwrap(), "found you");
    assert_eq!(recv(&mut alice).await.unwrap(), "found you");
}
