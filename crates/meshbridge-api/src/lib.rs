pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/peers", get(handlers::handle_peers))
        .route(
            "/topics",
            get(handlers::handle_topic_list).post(handlers::handle_topic_create),
        )
        .route("/topics/{topic_id}", get(handlers::handle_topic_inspect))
        .route("/topics/{topic_id}/peers", get(handlers::handle_topic_peers))
        .route("/topics/{topic_id}/join", get(handlers::handle_join))
        .route("/topics/{topic_id}/connect", get(handlers::handle_connect))
        .route("/daemon/shutdown", post(handlers::handle_shutdown))
        .with_state(state.clone());

    // Chat clients connect here without the /api prefix.
    let chat_routes = Router::new()
        .route("/topic/{topic_id}", get(handlers::handle_join))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .merge(chat_routes)
        .layer(cors)
}

/// Serve the API on `addr` until `shutdown` fires.
pub async fn serve(
    state: ApiState,
    addr: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
