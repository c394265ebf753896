//! Daemon status, mesh peers, shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    node_id: String,
    rendezvous: String,
    mesh_port: u16,
    topics: usize,
    links: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerEntry>,
}

#[derive(Deserialize)]
struct PeerEntry {
    node_id: String,
    addr: String,
    listen_port: u16,
    outbound: bool,
    topics: Vec<String>,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(base: &str) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base)).await?;

    println!("═══════════════════════════════════════");
    println!("  Meshbridge Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Node id     : {}", short(&resp.node_id));
    println!("  Rendezvous  : {}", resp.rendezvous);
    println!("  Mesh port   : {}", resp.mesh_port);
    println!("  Topics      : {}", resp.topics);
    println!("  Peer links  : {}", resp.links);
    println!("  Uptime      : {}s", resp.uptime_secs);

    Ok(())
}

pub async fn cmd_peers(base: &str) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers", base)).await?;

    if resp.peers.is_empty() {
        println!("No peer links yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Peer Links ({})", resp.peers.len());
    println!("═══════════════════════════════════════");

    for p in &resp.peers {
        let direction = if p.outbound { "outbound" } else { "inbound" };
        let topics = if p.topics.is_empty() {
            "-".to_string()
        } else {
            p.topics.join(", ")
        };
        println!("  ┌─ {}", short(&p.node_id));
        println!("  │  addr        : {}", p.addr);
        println!("  │  listen port : {}", p.listen_port);
        println!("  │  direction   : {}", direction);
        println!("  └─ topics      : {}", topics);
    }

    Ok(())
}

pub async fn cmd_shutdown(base: &str) -> Result<()> {
    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base)).await?;
    println!("{}", resp.message);
    Ok(())
}

pub(crate) fn short(id: &str) -> &str {
    &id[..16.min(id.len())]
}
