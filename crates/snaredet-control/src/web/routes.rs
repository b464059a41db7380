//! Route definitions

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};

use super::handlers::{ApiResponse, StatusResponse};
use super::server::AppState;
use super::websocket::ws_handler;

/// Build the router
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/api/status", get(get_status))
        .fallback(not_found)
}

/// GET /api/status - Get detector status
async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    let stats = state.stats.snapshot();
    let status = StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        clients: state.registry.len(),
        hits_broadcast: stats.hits_broadcast,
        deliveries: stats.deliveries,
        dropped_deliveries: stats.dropped_deliveries,
        connections_accepted: stats.connections_accepted,
        uptime_seconds: state.started.elapsed().as_secs(),
    };

    Json(ApiResponse::success(status))
}

async fn not_found() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error("not found".to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::BroadcasterStats;
    use crate::registry::ConnectionRegistry;
    use crate::web::WebServerConfig;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::sync::watch;

    fn state() -> (AppState, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let state = AppState {
            registry: ConnectionRegistry::default(),
            stats: Arc::new(BroadcasterStats::default()),
            config: Arc::new(WebServerConfig::default()),
            started: Instant::now(),
            shutdown: rx,
        };
        (state, tx)
    }

    #[tokio::test]
    async fn test_get_status() {
        let (state, _tx) = state();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let _ = state.registry.register(addr, Arc::from("hi"));
        state.stats.record_connection();

        let response = get_status(State(state)).await;
        assert!(response.0.success);
        let data = response.0.data.unwrap();
        assert_eq!(data.clients, 1);
        assert_eq!(data.connections_accepted, 1);
        assert_eq!(data.hits_broadcast, 0);
        assert_eq!(data.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, body) = not_found().await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.0.success);
    }
}
