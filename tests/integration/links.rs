//! Peer link establishment between in-process nodes.

use meshbridge_services::{DiscoveredPeer, DiscoverySource, PeerConnector};

use crate::*;

fn peer_of(node: &Node, source: DiscoverySource) -> DiscoveredPeer {
    DiscoveredPeer::new(Some(node.id), vec![node.addr], source)
}

#[tokio::test]
async fn connect_is_idempotent() {
    let a = Node::start(1).await;
    let b = Node::start(2).await;

    assert!(a.mesh.connect(&peer_of(&b, DiscoverySource::Local)).await.unwrap());
    wait_for(|| b.mesh.is_linked(&a.id)).await;

    // Repeated discovery of the same peer from any source is a no-op.
    for source in [DiscoverySource::Local, DiscoverySource::Dht, DiscoverySource::Seed] {
        assert!(!a.mesh.connect(&peer_of(&b, source)).await.unwrap());
    }
    assert_eq!(a.mesh.link_count(), 1);
    assert_eq!(b.mesh.link_count(), 1);
}

#[tokio::test]
async fn node_never_links_to_itself() {
    let a = Node::start(1).await;

    // By id.
    let by_id = peer_of(&a, DiscoverySource::Local);
    assert!(a.mesh.is_local(&by_id));
    assert!(!meshbridge_services::connect_if_not_self(&a.mesh, &by_id).await);

    // By address only, as DHT results arrive.
    let by_addr = DiscoveredPeer::new(None, vec![a.addr], DiscoverySource::Dht);
    assert!(!meshbridge_services::connect_if_not_self(&a.mesh, &by_addr).await);
    assert!(a.mesh.is_local(&by_addr));

    assert_eq!(a.mesh.link_count(), 0);
}

#[tokio::test]
async fn concurrent_connects_leave_one_link() {
    let a = Node::start(1).await;
    let b = Node::start(2).await;
    let to_b = peer_of(&b, DiscoverySource::Dht);
    let to_a = peer_of(&a, DiscoverySource::Dht);

    let (r1, r2, r3) = tokio::join!(
        a.mesh.connect(&to_b),
        a.mesh.connect(&to_b),
        b.mesh.connect(&to_a),
    );
    let results = [&r1, &r2, &r3];
    assert!(results.iter().all(|r| r.is_ok()), "{results:?}");
    assert!(results.iter().any(|r| matches!(r, Ok(true))), "{results:?}");

    wait_for(|| a.mesh.link_count() == 1 && b.mesh.link_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.mesh.link_count(), 1);
    assert_eq!(b.mesh.link_count(), 1);
}

#[tokio::test]
async fn peer_found_at_two_addresses_gets_one_working_link() {
    for _ in 0..10 {
        let a = Node::start(1).await;
        let b = Node::start_on(2, TAG, "0.0.0.0:0").await;
        let mut bob = b.client("lobby").await;
        let mut alice = a.client("lobby").await;

        // Local discovery sees one address, the DHT another.
        let local = peer_of(&b, DiscoverySource::Local);
        let other = SocketAddr::from(([127, 0, 0, 2], b.addr.port()));
        let dht = DiscoveredPeer::new(None, vec![other], DiscoverySource::Dht);

        let (r1, r2) = tokio::join!(
            meshbridge_services::connect_if_not_self(&a.mesh, &local),
            meshbridge_services::connect_if_not_self(&a.mesh, &dht),
        );
        assert!(r1 || r2);

        wait_for(|| a.mesh.link_count() == 1 && b.mesh.link_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(a.mesh.is_linked(&b.id));
        assert!(b.mesh.is_linked(&a.id));

        wait_for(|| a.topic_peers("lobby") == vec![b.id]).await;
        alice.tx.send(Bytes::from_static(b"one link")).await.unwrap();
        assert_eq!(recv(&mut bob).await.unwrap(), "one link");
        assert_eq!(recv(&mut alice).await.unwrap(), "one link");
    }
}

#[tokio::test]
async fn other_rendezvous_tag_is_refused() {
    let a = Node::start(1).await;
    let b = Node::start_with_tag(2, "elsewhere").await;

    assert!(a.mesh.connect(&peer_of(&b, DiscoverySource::Seed)).await.is_err());
    assert_eq!(a.mesh.link_count(), 0);
    assert_eq!(b.mesh.link_count(), 0);
}

#[tokio::test]
async fn link_drops_when_peer_shuts_down() {
    let a = Node::start(1).await;
    let b = Node::start(2).await;

    a.mesh.connect(&peer_of(&b, DiscoverySource::Local)).await.unwrap();
    wait_for(|| b.mesh.is_linked(&a.id)).await;

    let _ = b.shutdown.send(());
    wait_for(|| a.mesh.link_count() == 0).await;
}
