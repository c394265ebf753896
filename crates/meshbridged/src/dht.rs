//! Mainline DHT routing table.
//!
//! `mainline` exposes a blocking client; every call runs on the blocking
//! pool. The info-hash for a tag is the first 20 bytes of its BLAKE3 hash.

use std::net::SocketAddr;
use std::sync::OnceLock;

use async_trait::async_trait;
use mainline::{Dht, Id};

use meshbridge_core::RendezvousTag;
use meshbridge_services::{DiscoveryError, RoutingTable};

pub struct MainlineRoutingTable {
    bootstrap: Vec<String>,
    dht: OnceLock<Dht>,
}

impl MainlineRoutingTable {
    pub fn new(bootstrap: Vec<String>) -> Self {
        Self {
            bootstrap,
            dht: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<Dht, String> {
        self.dht
            .get()
            .cloned()
            .ok_or_else(|| "routing table not started".to_string())
    }
}

fn info_hash(tag: &RendezvousTag) -> Result<Id, String> {
    Id::from_bytes(tag.info_hash()).map_err(|e| format!("{e:?}"))
}

#[async_trait]
impl RoutingTable for MainlineRoutingTable {
    async fn start(&self) -> Result<(), DiscoveryError> {
        if self.dht.get().is_some() {
            return Ok(());
        }
        let nodes = self.bootstrap.clone();
        let dht = tokio::task::spawn_blocking(move || Dht::builder().bootstrap(&nodes).build())
            .await
            .map_err(|e| DiscoveryError::RoutingInit(e.to_string()))?
            .map_err(|e| DiscoveryError::RoutingInit(format!("{e:?}")))?;

        let _ = self.dht.set(dht);
        tracing::info!(bootstrap = self.bootstrap.len(), "mainline dht started");
        Ok(())
    }

    async fn advertise(&self, tag: &RendezvousTag, port: u16) -> Result<(), DiscoveryError> {
        let dht = self.client().map_err(DiscoveryError::Advertise)?;
        let id = info_hash(tag).map_err(DiscoveryError::Advertise)?;

        tokio::task::spawn_blocking(move || dht.announce_peer(id, Some(port)).map(|_| ()))
            .await
            .map_err(|e| DiscoveryError::Advertise(e.to_string()))?
            .map_err(|e| DiscoveryError::Advertise(format!("{e:?}")))
    }

    async fn search(&self, tag: &RendezvousTag) -> Result<Vec<SocketAddr>, DiscoveryError> {
        let dht = self.client().map_err(DiscoveryError::Search)?;
        let id = info_hash(tag).map_err(DiscoveryError::Search)?;

        tokio::task::spawn_blocking(move || {
            let mut found: Vec<SocketAddr> = Vec::new();
            for peers in dht.get_peers(id) {
                for peer in peers {
                    let addr = SocketAddr::from(peer);
                    if !found.contains(&addr) {
                        found.push(addr);
                    }
                }
            }
            found
        })
        .await
        .map_err(|e| DiscoveryError::Search(e.to_string()))
    }
}
