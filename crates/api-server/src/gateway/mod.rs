//! Gateway module for live gateway connections
//!
//! Gateways dial in over WebSocket, authenticate with their API key and are
//! then kept in the connection registry. Control-plane events are pushed to
//! them through the broadcast service.

pub mod connection;
pub mod events;
pub mod handler;
pub mod manager;
pub mod protocol;
pub mod rate_limit;
pub mod stats;
pub mod transport;

pub use connection::ConnectionInfo;
pub use events::{BroadcastOutcome, EventError, GatewayEventsService};
pub use handler::gateway_ws_handler;
pub use manager::{ConnectionManager, ManagerStats};
pub use protocol::*;
pub use rate_limit::ConnectRateLimiter;
