//! Sockets bridged to the same topic on different nodes.

use meshbridge_services::{DiscoveredPeer, DiscoverySource, PeerConnector};

use crate::*;

async fn linked_pair() -> (Node, Node) {
    let a = Node::start(1).await;
    let b = Node::start(2).await;
    let to_b = DiscoveredPeer::new(Some(b.id), vec![b.addr], DiscoverySource::Local);
    assert!(a.mesh.connect(&to_b).await.unwrap());
    wait_for(|| b.mesh.is_linked(&a.id)).await;
    (a, b)
}

#[tokio::test]
async fn message_crosses_nodes() {
    let (a, b) = linked_pair().await;
    let mut alice = a.client("lobby").await;
    let mut bob = b.client("lobby").await;
    wait_for(|| a.topic_peers("lobby") == vec![b.id] && b.topic_peers("lobby") == vec![a.id]).await;

    alice.tx.send(Bytes::from_static(b"hi bob")).await.unwrap();

    assert_eq!(recv(&mut bob).await.unwrap(), "hi bob");
    // Publishers hear their own messages.
    assert_eq!(recv(&mut alice).await.unwrap(), "hi bob");

    bob.tx.send(Bytes::from_static(b"hi alice")).await.unwrap();
    assert_eq!(recv(&mut alice).await.unwrap(), "hi alice");
    assert_eq!(recv(&mut bob).await.unwrap(), "hi alice");
}

#[tokio::test]
async fn topics_are_isolated() {
    let (a, b) = linked_pair().await;
    let mut alice = a.client("lobby").await;
    let mut bob = b.client("lobby").await;
    let mut carol = b.client("kitchen").await;
    wait_for(|| b.topic_peers("lobby") == vec![a.id]).await;

    alice.tx.send(Bytes::from_static(b"lobby only")).await.unwrap();
    assert_eq!(recv(&mut bob).await.unwrap(), "lobby only");
    assert!(quiet_for(&mut carol, 200).await);
}

#[tokio::test]
async fn order_is_preserved_across_the_link() {
    let (a, b) = linked_pair().await;
    let alice = a.client("stream").await;
    let mut bob = b.client("stream").await;
    wait_for(|| a.topic_peers("stream") == vec![b.id]).await;

    for i in 0..50u32 {
        alice.tx.send(Bytes::from(format!("msg-{i}"))).await.unwrap();
    }
    for i in 0..50u32 {
        assert_eq!(recv(&mut bob).await.unwrap(), format!("msg-{i}"));
    }
}

#[tokio::test]
async fn reconnect_replaces_socket_and_keeps_topic() {
    let (a, b) = linked_pair().await;
    let mut first = b.client("lobby").await;
    let mut alice = a.client("lobby").await;
    wait_for(|| a.topic_peers("lobby") == vec![b.id]).await;

    let mut second = b.client("lobby").await;
    // The superseded socket is closed by the bridge.
    assert!(recv(&mut first).await.is_none());
    assert_eq!(b.bridge.registry().len(), 1);

    alice.tx.send(Bytes::from_static(b"still here?")).await.unwrap();
    assert_eq!(recv(&mut second).await.unwrap(), "still here?");
    assert_eq!(recv(&mut alice).await.unwrap(), "still here?");
}

#[tokio::test]
async fn topic_outlives_its_socket() {
    let (a, b) = linked_pair().await;
    let bob = b.client("lobby").await;
    let mut alice = a.client("lobby").await;
    wait_for(|| a.topic_peers("lobby") == vec![b.id]).await;

    drop(bob);
    let id = TopicId::new("lobby").unwrap();
    let topic = b.bridge.registry().get(&id).unwrap();
    for _ in 0..400 {
        if topic.active_connection().await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(topic.active_connection().await.is_none());

    // B stays subscribed, so A still sees it as a peer on the topic.
    assert_eq!(a.topic_peers("lobby"), vec![b.id]);
    alice.tx.send(Bytes::from_static(b"anyone?")).await.unwrap();
    assert_eq!(recv(&mut alice).await.unwrap(), "anyone?");
}
