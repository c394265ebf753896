//! /status, /peers, /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub rendezvous: String,
    pub mesh_port: u16,
    pub topics: usize,
    pub links: usize,
    pub uptime_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        node_id: state.mesh.local_id().to_string(),
        rendezvous: state.rendezvous.clone(),
        mesh_port: state.mesh.listen_port(),
        topics: state.bridge.registry().len(),
        links: state.mesh.link_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ── /peers ───────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerEntry>,
}

#[derive(Serialize, Deserialize)]
pub struct PeerEntry {
    pub node_id: String,
    pub addr: String,
    pub listen_port: u16,
    pub outbound: bool,
    pub topics: Vec<String>,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let peers = state
        .mesh
        .links()
        .into_iter()
        .map(|p| PeerEntry {
            node_id: p.node_id.to_string(),
            addr: p.addr.to_string(),
            listen_port: p.listen_port,
            outbound: p.outbound,
            topics: p.topics.iter().map(|t| t.as_str().to_string()).collect(),
        })
        .collect();
    Json(PeersResponse { peers })
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
