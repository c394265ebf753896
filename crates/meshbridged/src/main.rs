//! meshbridged: topic bridge and peer discovery daemon.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use meshbridge_core::config::MeshbridgeConfig;
use meshbridge_core::wire::Announcement;
use meshbridge_core::{NodeId, RendezvousTag};
use meshbridge_services::{
    connect_if_not_self, Bridge, DhtDiscovery, DhtSettings, DiscoveredPeer, DiscoverySource,
    LocalDiscoveryLoop, Mesh, PeerConnector, TopicRegistry,
};

mod dht;
mod multicast;

use multicast::{announce, MulticastDiscovery, MulticastGroup};

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Command-line overrides. Unset flags leave the config untouched.
#[derive(Debug, Default, PartialEq)]
struct Flags {
    addr: Option<String>,
    port: Option<u16>,
    rendezvous: Option<String>,
    mesh_port: Option<u16>,
    seeds: Vec<String>,
    log_level: Option<String>,
    no_dht: bool,
    no_local: bool,
    help: bool,
}

fn parse_flags(args: &[String]) -> Result<Flags> {
    let mut flags = Flags::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .with_context(|| format!("{flag} requires a value"))
        };
        match flag {
            "--addr" => flags.addr = Some(value()?),
            "--port" => flags.port = Some(value()?.parse().context("--port must be a number")?),
            "--rendezvous" => flags.rendezvous = Some(value()?),
            "--mesh-port" => {
                flags.mesh_port = Some(value()?.parse().context("--mesh-port must be a number")?)
            }
            "--seed" => flags.seeds.push(value()?),
            "--log-level" => flags.log_level = Some(value()?),
            "--no-dht" => flags.no_dht = true,
            "--no-local" => flags.no_local = true,
            "--help" | "-h" => flags.help = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }
    Ok(flags)
}

impl Flags {
    fn apply(&self, config: &mut MeshbridgeConfig) {
        if let Some(addr) = &self.addr {
            config.network.listen_addr = addr.clone();
        }
        if let Some(port) = self.port {
            config.network.listen_port = port;
        }
        if let Some(tag) = &self.rendezvous {
            config.discovery.rendezvous = tag.clone();
        }
        if let Some(port) = self.mesh_port {
            config.network.mesh_port = port;
        }
        if !self.seeds.is_empty() {
            config.discovery.seed_peers = self.seeds.clone();
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if self.no_dht {
            config.discovery.dht = false;
        }
        if self.no_local {
            config.discovery.local = false;
        }
    }
}

fn print_usage() {
    println!("Usage: meshbridged [options]");
    println!();
    println!("Options:");
    println!("  --addr <ip>           API bind address (default: 127.0.0.1)");
    println!("  --port <port>         API port (default: 5002)");
    println!("  --rendezvous <tag>    Discovery rendezvous tag (default: myspace)");
    println!("  --mesh-port <port>    Peer link port (default: OS-assigned)");
    println!("  --seed <host:port>    Seed peer, repeatable");
    println!("  --log-level <filter>  tracing filter (default: info)");
    println!("  --no-dht              Disable DHT discovery");
    println!("  --no-local            Disable local multicast discovery");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let flags = parse_flags(&args)?;
    if flags.help {
        print_usage();
        return Ok(());
    }

    // Load config
    let written = MeshbridgeConfig::write_default_if_missing(MeshbridgeConfig::file_path());
    let loaded = MeshbridgeConfig::load();
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => MeshbridgeConfig::default(),
    };
    flags.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write default config");
    }
    if let Err(e) = loaded {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }

    // Identity
    let node_id = NodeId::generate();
    let tag = RendezvousTag::new(config.discovery.rendezvous.clone());
    tracing::info!(node = %node_id, rendezvous = %tag, "meshbridged starting");

    // Mesh
    let mesh_listener = TcpListener::bind(config.network.mesh_socket())
        .await
        .with_context(|| format!("failed to bind mesh listener on {}", config.network.mesh_socket()))?;
    let mesh_port = mesh_listener.local_addr()?.port();
    let mesh = Mesh::new(node_id, &tag, mesh_port);

    // Bridge
    let registry = Arc::new(TopicRegistry::new(Arc::new(mesh.clone())));
    let bridge = Bridge::new(registry.clone(), config.bridge.welcome);
    let connector: Arc<dyn PeerConnector> = Arc::new(mesh.clone());

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let mut mesh_task = {
        let mesh = mesh.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { mesh.serve(mesh_listener, shutdown).await })
    };

    if config.discovery.dht {
        let routing = Arc::new(dht::MainlineRoutingTable::new(
            config.discovery.dht_bootstrap.clone(),
        ));
        let settings = DhtSettings {
            seeds: config.discovery.seed_peers.clone(),
            mesh_port,
            search_interval: config.discovery.search_interval(),
            stop_after_first_connect: config.discovery.stop_after_first_connect,
        };
        let discovery = DhtDiscovery::new(
            routing,
            connector.clone(),
            tag.clone(),
            settings,
            shutdown_tx.subscribe(),
        );
        tokio::spawn(async move {
            // Failure is logged inside; local discovery keeps running.
            let _ = discovery.run().await;
        });
    } else if !config.discovery.seed_peers.is_empty() {
        tokio::spawn(dial_seeds(connector.clone(), config.discovery.seed_peers.clone()));
    }

    if config.discovery.local {
        let group = MulticastGroup::new(
            config.discovery.multicast_group,
            config.discovery.multicast_port,
        );

        tokio::spawn(
            LocalDiscoveryLoop::new(
                Arc::new(MulticastDiscovery::new(group)),
                connector.clone(),
                tag.clone(),
                shutdown_tx.subscribe(),
            )
            .run(),
        );

        let announcement = Announcement::new(&node_id, tag.hash(), mesh_port);
        let interval = config.discovery.announce_interval();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = announce::announce_loop(announcement, group, interval, shutdown).await {
                tracing::error!(error = %e, "local announcements failed");
            }
        });
    }

    tracing::info!(
        mesh_port,
        dht = config.discovery.dht,
        local = config.discovery.local,
        seeds = config.discovery.seed_peers.len(),
        "discovery configured"
    );

    // API
    let mut api_task = {
        let state = meshbridge_api::ApiState {
            bridge,
            mesh: mesh.clone(),
            rendezvous: tag.as_str().to_string(),
            started_at: Instant::now(),
            shutdown_tx: shutdown_tx.clone(),
        };
        let addr = config.network.api_socket();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { meshbridge_api::serve(state, &addr, shutdown).await })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    let exit = tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            Ok(())
        }
        r = &mut api_task => api_exit(r),
        r = &mut mesh_task => {
            tracing::error!("mesh accept loop exited: {:?}", r);
            Err(anyhow::anyhow!("mesh accept loop exited unexpectedly"))
        }
    };

    let _ = shutdown_tx.send(());
    registry.close_all().await;
    if !api_task.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(2), api_task).await;
    }

    exit
}

/// The API server only returns on its own when it failed, usually to bind.
fn api_exit(r: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match r {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "API server failed");
            Err(e.context("API server failed"))
        }
        Err(e) => {
            tracing::error!(error = %e, "API server task panicked");
            Err(anyhow::Error::new(e).context("API server task panicked"))
        }
    }
}

/// Dial seed peers once. Used when the DHT is disabled.
async fn dial_seeds(connector: Arc<dyn PeerConnector>, seeds: Vec<String>) {
    for seed in seeds {
        let addrs: Vec<_> = match tokio::net::lookup_host(seed.as_str()).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                tracing::warn!(%seed, error = %e, "seed did not resolve");
                continue;
            }
        };
        let peer = DiscoveredPeer::new(None, addrs, DiscoverySource::Seed);
        connect_if_not_self(connector.as_ref(), &peer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_bind_failure_fails_the_daemon() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let failed = tokio::spawn(async move {
            TcpListener::bind(&addr).await.context("bind API")?;
            Ok::<(), anyhow::Error>(())
        })
        .await;
        let err = api_exit(failed).unwrap_err();
        assert!(format!("{err:#}").contains("bind API"), "{err:#}");

        let clean = tokio::spawn(async { Ok::<(), anyhow::Error>(()) }).await;
        assert!(api_exit(clean).is_ok());

        let panicked = tokio::spawn(async {
            if true {
                panic!("boom");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await;
        assert!(api_exit(panicked).is_err());
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_override_config() {
        let flags = parse_flags(&args(&[
            "--port",
            "6000",
            "--rendezvous",
            "lab",
            "--seed",
            "10.0.0.2:47100",
            "--seed",
            "10.0.0.3:47100",
            "--no-dht",
        ]))
        .unwrap();

        let mut config = MeshbridgeConfig::default();
        flags.apply(&mut config);

        assert_eq!(config.network.listen_port, 6000);
        assert_eq!(config.discovery.rendezvous, "lab");
        assert_eq!(config.discovery.seed_peers.len(), 2);
        assert!(!config.discovery.dht);
        assert!(config.discovery.local);
    }

    #[test]
    fn no_flags_leave_config_alone() {
        let flags = parse_flags(&[]).unwrap();
        assert_eq!(flags, Flags::default());
    }

    #[test]
    fn missing_value_is_an_error() {
        assert!(parse_flags(&args(&["--port"])).is_err());
        assert!(parse_flags(&args(&["--port", "http"])).is_err());
        assert!(parse_flags(&args(&["--bogus"])).is_err());
    }
}
