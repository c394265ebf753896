//! HTTP API handlers: topics, bridged sockets, and node state as JSON.

pub mod socket;
pub mod status;
pub mod topics;

use std::time::Instant;

use axum::http::StatusCode;

use meshbridge_core::TopicId;
use meshbridge_services::{Bridge, Mesh, RegistryError};

#[derive(Clone)]
pub struct ApiState {
    pub bridge: Bridge,
    pub mesh: Mesh,
    pub rendezvous: String,
    pub started_at: Instant,
    /// Shutdown broadcast sender. Signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn parse_topic_id(raw: &str) -> Result<TopicId, (StatusCode, String)> {
    TopicId::new(raw).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

fn join_failed(e: RegistryError) -> (StatusCode, String) {
    tracing::error!(error = %e, "topic join failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn unknown_topic(id: &TopicId) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("unknown topic {id}"))
}

// Re-export handler functions for use in router setup.
pub use socket::{handle_connect, handle_join};
pub use status::{handle_peers, handle_shutdown, handle_status};
pub use topics::{handle_topic_create, handle_topic_inspect, handle_topic_list, handle_topic_peers};
