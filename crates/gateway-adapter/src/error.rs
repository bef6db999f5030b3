//! Error types for gateway adapters

use acp_core::crypto::CryptoError;
use thiserror::Error;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors that can occur while managing a remote gateway
#[derive(Debug, Error)]
pub enum AdapterError {
    /// No constructor registered for the requested adapter type
    #[error("unsupported adapter type: {adapter_type}")]
    UnsupportedAdapterType { adapter_type: String },

    /// Gateway is not known to the control plane
    #[error("gateway not found: {gateway_id}")]
    GatewayNotFound { gateway_id: String },

    /// Provider is not deployed on the remote gateway
    #[error("provider not found: {provider_id}")]
    ProviderNotFound { provider_id: String },

    /// Gateway or adapter configuration is incomplete or invalid
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Stored credentials could not be used
    #[error("failed to decrypt credentials: {0}")]
    Credentials(#[from] CryptoError),

    /// Remote gateway could not be reached
    #[error("gateway endpoint unreachable: {message}")]
    Unreachable {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Remote gateway answered with a non-success status
    #[error("{operation} failed with status {status}")]
    RequestFailed { operation: String, status: u16 },

    /// Remote gateway answered with a body we could not understand
    #[error("invalid response from gateway: {message}")]
    InvalidResponse { message: String },

    /// Gateway store lookup failed
    #[error("gateway store error: {0}")]
    Store(String),

    /// Adapter-specific failure
    #[error("{message}")]
    Failure { message: String },
}

impl AdapterError {
    /// Create a Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an Unreachable error with source
    pub fn unreachable(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Unreachable {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a RequestFailed error
    pub fn request_failed(operation: impl Into<String>, status: u16) -> Self {
        Self::RequestFailed {
            operation: operation.into(),
            status,
        }
    }

    /// Create an InvalidResponse error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a Failure error
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }
}

impl From<acp_core::Error> for AdapterError {
    fn from(err: acp_core::Error) -> Self {
        match err {
            acp_core::Error::GatewayNotFound(gateway_id) => Self::GatewayNotFound { gateway_id },
            acp_core::Error::InvalidInput(message) => Self::Configuration { message },
            other => Self::Store(other.to_string()),
        }
    }
}
