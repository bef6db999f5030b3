//! Gateway WebSocket endpoint and connection registry view

use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tower_http::timeout::TimeoutLayer;

use crate::gateway::{gateway_ws_handler, ConnectionInfo, ManagerStats};
use crate::state::AppState;

pub const GATEWAY_CONNECT_PATH: &str = "/api/internal/v1/ws/gateways/connect";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionsResponse {
    stats: ManagerStats,
    max_connections: usize,
    connections: Vec<ConnectionInfo>,
}

async fn list_connections(State(state): State<AppState>) -> Json<ConnectionsResponse> {
    let manager = state.manager();
    Json(ConnectionsResponse {
        stats: manager.stats().await,
        max_connections: manager.max_connections(),
        connections: manager.connections_info().await,
    })
}

/// The timeout only bounds the HTTP upgrade; the socket task runs detached.
pub fn router(handshake_timeout: Duration) -> Router<AppState> {
    Router::new()
        .route(
            GATEWAY_CONNECT_PATH,
            get(gateway_ws_handler).layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                handshake_timeout,
            )),
        )
        .route("/api/v1/gateways/connections", get(list_connections))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::gateway::transport::testing::FakeTransport;
    use acp_core::crypto::generate_encryption_key;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn connections_snapshot_lists_registered_connections() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let state = AppState::new(config, generate_encryption_key())
            .await
            .unwrap();
        let (transport, _) = FakeTransport::new();
        state
            .manager()
            .register("gw-1", transport.boxed(), "key")
            .await
            .unwrap();

        let app = router(Duration::from_secs(10)).with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/gateways/connections")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["stats"]["totalConnections"], 1);
        assert_eq!(json["stats"]["totalGateways"], 1);
        assert_eq!(json["connections"][0]["gatewayId"], "gw-1");
        assert_eq!(json["maxConnections"], 1000);
    }

    #[tokio::test]
    async fn upgrade_without_websocket_headers_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let state = AppState::new(config, generate_encryption_key())
            .await
            .unwrap();

        let app = router(Duration::from_secs(10)).with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(GATEWAY_CONNECT_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
