//! WebSocket handler for gateway connections

use std::net::SocketAddr;
use std::sync::Arc;

use acp_core::Error as StoreError;
use axum::{
    extract::{ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use super::manager::RegisterRejection;
use super::protocol::{ServerFrame, CLOSE_TRY_AGAIN_LATER};
use super::transport::{TransportError, TransportMessage, WebSocketTransport};
use crate::routes::api_error;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "api-key";

/// A connection attempt that passed every pre-upgrade check
#[derive(Debug)]
pub(crate) struct Admission {
    pub gateway_id: String,
    pub api_key: String,
}

/// Authenticate, rate limit and upgrade a gateway connection
pub async fn gateway_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let address = remote.ip().to_string();
    let Admission {
        gateway_id,
        api_key,
    } = match admit(&state, &address, &headers).await {
        Ok(admission) => admission,
        Err(response) => return response,
    };

    let failed_gateway_id = gateway_id.clone();
    ws.on_failed_upgrade(move |err| {
        error!(
            "WebSocket upgrade failed gateway_id={} error={}",
            failed_gateway_id, err
        );
    })
    .on_upgrade(move |socket| handle_gateway_socket(socket, state, gateway_id, api_key, address))
}

/// Pre-upgrade checks, in order: rate limit, api key present, api key
/// known, capacity available
pub(crate) async fn admit(
    state: &AppState,
    address: &str,
    headers: &HeaderMap,
) -> Result<Admission, Response> {
    if !state.rate_limiter().check(address).await {
        warn!("Rate limit exceeded address={}", address);
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Connection rate limit exceeded. Please try again later.",
        )
        .into_response());
    }

    let api_key = match extract_api_key(headers) {
        Some(api_key) => api_key.to_string(),
        None => {
            warn!("WebSocket connection attempt without API key address={}", address);
            return Err(api_error(
                StatusCode::UNAUTHORIZED,
                "API key is required. Provide 'api-key' header.",
            )
            .into_response());
        }
    };

    let gateway = match state.gateway_store().verify_api_key(&api_key).await {
        Ok(gateway) => gateway,
        Err(err) => {
            warn!(
                "WebSocket authentication failed address={} error={}",
                address, err
            );
            let message = match err {
                StoreError::GatewayNotFound(_) => "Invalid API key",
                _ => "Authentication failed",
            };
            return Err(api_error(StatusCode::UNAUTHORIZED, message).into_response());
        }
    };

    if !state.manager().has_capacity().await {
        warn!(
            "Rejecting gateway connection at capacity gateway_id={} max={}",
            gateway.id,
            state.manager().max_connections()
        );
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Maximum connections reached. Please try again later.",
        )
        .into_response());
    }

    Ok(Admission {
        gateway_id: gateway.id.to_string(),
        api_key,
    })
}

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Drive one upgraded gateway socket until it closes
async fn handle_gateway_socket(
    socket: WebSocket,
    state: AppState,
    gateway_id: String,
    api_key: String,
    address: String,
) {
    let transport = Box::new(WebSocketTransport::new(socket));
    let connection = match state
        .manager()
        .register(&gateway_id, transport, &api_key)
        .await
    {
        Ok(connection) => connection,
        Err(rejection) => {
            error!(
                "Connection registration failed gateway_id={} error={}",
                gateway_id, rejection.error
            );
            reject(rejection).await;
            return;
        }
    };

    match serde_json::to_vec(&ServerFrame::ack(&gateway_id, connection.connection_id())) {
        Ok(ack) => {
            if let Err(e) = connection.send(&ack).await {
                error!(
                    "Failed to send connection ack gateway_id={} connection_id={} error={}",
                    gateway_id,
                    connection.connection_id(),
                    e
                );
            }
        }
        Err(e) => error!("Failed to serialize connection ack gateway_id={} error={}", gateway_id, e),
    }

    info!(
        "WebSocket connection established gateway_id={} connection_id={} address={}",
        gateway_id,
        connection.connection_id(),
        address
    );
    set_gateway_active(&state, &gateway_id, true).await;

    run_read_loop(Arc::clone(&connection)).await;

    info!(
        "WebSocket connection closed gateway_id={} connection_id={}",
        gateway_id,
        connection.connection_id()
    );
    state
        .manager()
        .unregister(&gateway_id, connection.connection_id())
        .await;

    settle_gateway_inactive(&state, &gateway_id).await;
}

/// Mark the gateway inactive once its last connection is gone. A connection
/// registered while the flag was being cleared restores it.
pub(crate) async fn settle_gateway_inactive(state: &AppState, gateway_id: &str) {
    if !state.manager().connections(gateway_id).is_empty() {
        return;
    }
    set_gateway_active(state, gateway_id, false).await;
    if !state.manager().connections(gateway_id).is_empty() {
        set_gateway_active(state, gateway_id, true).await;
    }
}

/// Tell the peer why it was refused, then close with "try again later"
async fn reject(rejection: RegisterRejection) {
    let RegisterRejection { error, transport } = rejection;
    let frame = ServerFrame::Error {
        message: error.to_string(),
    };
    if let Ok(data) = serde_json::to_vec(&frame) {
        if let Err(e) = transport.send(&data).await {
            debug!("Failed to send rejection frame error={}", e);
        }
    }
    if let Err(e) = transport
        .close(CLOSE_TRY_AGAIN_LATER, "try again later")
        .await
    {
        debug!("Failed to close rejected connection error={}", e);
    }
}

async fn set_gateway_active(state: &AppState, gateway_id: &str, is_active: bool) {
    if let Err(e) = state.gateway_store().set_active(gateway_id, is_active).await {
        error!(
            "Failed to update gateway active status gateway_id={} active={} error={}",
            gateway_id, is_active, e
        );
    }
}

/// Run the read loop in its own task so a panic only ends this connection
pub(crate) async fn run_read_loop(connection: Arc<Connection>) {
    let gateway_id = connection.gateway_id().to_string();
    let connection_id = connection.connection_id().to_string();

    if let Err(e) = tokio::spawn(read_loop(connection)).await {
        if e.is_panic() {
            error!(
                "Panic in WebSocket read loop gateway_id={} connection_id={} error={}",
                gateway_id, connection_id, e
            );
        } else {
            warn!(
                "WebSocket read loop cancelled gateway_id={} connection_id={}",
                gateway_id, connection_id
            );
        }
    }
}

/// Drain inbound frames. Keep-alive acknowledgments are handled by the
/// transport; anything else from the gateway is ignored.
async fn read_loop(connection: Arc<Connection>) {
    loop {
        let message = tokio::select! {
            _ = connection.closed() => return,
            message = connection.read_message() => message,
        };

        match message {
            Ok(TransportMessage::Text(text)) => {
                debug!(
                    "Ignoring text frame gateway_id={} connection_id={} len={}",
                    connection.gateway_id(),
                    connection.connection_id(),
                    text.len()
                );
            }
            Ok(TransportMessage::Binary(data)) => {
                debug!(
                    "Ignoring binary frame gateway_id={} connection_id={} len={}",
                    connection.gateway_id(),
                    connection.connection_id(),
                    data.len()
                );
            }
            Err(e) if e.is_expected_close() => {
                info!(
                    "Gateway closed connection gateway_id={} connection_id={} reason={}",
                    connection.gateway_id(),
                    connection.connection_id(),
                    e
                );
                return;
            }
            Err(TransportError::Timeout) => {
                warn!(
                    "WebSocket read deadline exceeded gateway_id={} connection_id={}",
                    connection.gateway_id(),
                    connection.connection_id()
                );
                return;
            }
            Err(e) => {
                error!(
                    "WebSocket read error gateway_id={} connection_id={} error={}",
                    connection.gateway_id(),
                    connection.connection_id(),
                    e
                );
                return;
            }
        }
    }
}
