//! Agent control plane server
//!
//! Accepts persistent WebSocket connections from remote gateways, pushes
//! control-plane events to them and manages their LLM providers through
//! gateway adapters.

mod config;
mod gateway;
mod routes;
mod state;

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api_server=debug,gateway_adapter=debug,acp_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Using data directory: {:?}", config.data_dir);

    let encryption_key = config
        .resolve_encryption_key()
        .context("ACP_ENCRYPTION_KEY is invalid")?;
    let bind_addr = config.bind_addr;
    let handshake_timeout = config.handshake_timeout;

    let state = AppState::new(config, encryption_key)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!(
        "Connection manager initialized max_connections={} adapters={:?}",
        state.manager().max_connections(),
        state.adapters().supported_types()
    );

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::gateway::router(handshake_timeout))
        .merge(routes::gateways::router())
        .merge(routes::events::router())
        .with_state(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Control plane listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Closing gateway connections");
    state.manager().shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
