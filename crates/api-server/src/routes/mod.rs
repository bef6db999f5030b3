//! Route handlers

use axum::{http::StatusCode, Json};
use gateway_adapter::AdapterError;
use serde::Serialize;
use tracing::error;

use crate::gateway::EventError;

pub mod events;
pub mod gateway;
pub mod gateways;
pub mod health;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type RouteError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> RouteError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn map_store_error(err: acp_core::Error) -> RouteError {
    match err {
        acp_core::Error::GatewayNotFound(_) | acp_core::Error::NotFound(_) => {
            api_error(StatusCode::NOT_FOUND, err.to_string())
        }
        acp_core::Error::InvalidInput(_) => api_error(StatusCode::BAD_REQUEST, err.to_string()),
        acp_core::Error::Conflict(_) => api_error(StatusCode::CONFLICT, err.to_string()),
        _ => {
            error!("Gateway store error: {}", err);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub fn map_adapter_error(err: AdapterError) -> RouteError {
    let status = match &err {
        AdapterError::GatewayNotFound { .. } | AdapterError::ProviderNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        AdapterError::UnsupportedAdapterType { .. } | AdapterError::Configuration { .. } => {
            StatusCode::BAD_REQUEST
        }
        AdapterError::Unreachable { .. }
        | AdapterError::RequestFailed { .. }
        | AdapterError::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
        AdapterError::Credentials(_) | AdapterError::Store(_) | AdapterError::Failure { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!("Gateway adapter error: {}", err);
    }
    api_error(status, err.to_string())
}

pub fn map_event_error(err: EventError) -> RouteError {
    match err {
        EventError::PayloadTooLarge { .. } => {
            api_error(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
        }
        EventError::Serialization(_) => api_error(StatusCode::BAD_REQUEST, err.to_string()),
    }
}
