//! A single live gateway connection

use std::sync::{Arc, PoisonError, RwLock as StdRwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::stats::{DeliveryStats, DeliveryStatsSnapshot};
use super::transport::{Transport, TransportError, TransportMessage};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One upgraded gateway socket. Owns its transport for its whole lifetime.
pub struct Connection {
    gateway_id: String,
    connection_id: String,
    connected_at: DateTime<Utc>,
    auth_token: String,
    transport: Box<dyn Transport>,
    stats: DeliveryStats,
    // held shared across a send, exclusively by close
    closed: RwLock<bool>,
    closed_signal: CancellationToken,
    last_heartbeat: StdRwLock<Instant>,
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub gateway_id: String,
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
    pub seconds_since_heartbeat: u64,
    pub closed: bool,
    pub stats: DeliveryStatsSnapshot,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("gateway_id", &self.gateway_id)
            .field("connection_id", &self.connection_id)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        gateway_id: impl Into<String>,
        transport: Box<dyn Transport>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            connection_id: Uuid::new_v4().to_string(),
            connected_at: Utc::now(),
            auth_token: auth_token.into(),
            transport,
            stats: DeliveryStats::default(),
            closed: RwLock::new(false),
            closed_signal: CancellationToken::new(),
            last_heartbeat: StdRwLock::new(Instant::now()),
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    /// Send one frame. Does not touch the delivery stats.
    pub async fn send(&self, data: &[u8]) -> Result<(), ConnectionError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(ConnectionError::Closed);
        }
        self.transport.send(data).await?;
        Ok(())
    }

    /// Send a keep-alive ping that must be written before `write_wait` passes
    pub async fn send_ping(&self, write_wait: Duration) -> Result<(), ConnectionError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(ConnectionError::Closed);
        }
        self.transport
            .set_write_deadline(Some(Instant::now() + write_wait));
        let result = self.transport.send_ping().await;
        self.transport.set_write_deadline(None);
        result.map_err(ConnectionError::from)
    }

    /// Close the connection. A second call is a no-op.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        {
            let mut closed = self.closed.write().await;
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        self.closed_signal.cancel();
        self.transport.close(code, reason).await?;
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }

    /// Resolves once [`Connection::close`] has been called
    pub async fn closed(&self) {
        self.closed_signal.cancelled().await
    }

    pub async fn read_message(&self) -> Result<TransportMessage, TransportError> {
        self.transport.read_message().await
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.transport.set_read_deadline(deadline);
    }

    pub fn update_heartbeat(&self) {
        *self
            .last_heartbeat
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self
            .last_heartbeat
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh the heartbeat and push the read deadline out by
    /// `heartbeat_timeout` on every keep-alive acknowledgment.
    pub(crate) fn install_pong_handler(self: &Arc<Self>, heartbeat_timeout: Duration) {
        let weak: Weak<Connection> = Arc::downgrade(self);
        self.transport.set_pong_handler(Arc::new(move || {
            if let Some(connection) = weak.upgrade() {
                connection.update_heartbeat();
                connection.set_read_deadline(Some(Instant::now() + heartbeat_timeout));
            }
        }));
        self.set_read_deadline(Some(Instant::now() + heartbeat_timeout));
    }

    pub async fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            gateway_id: self.gateway_id.clone(),
            connection_id: self.connection_id.clone(),
            connected_at: self.connected_at,
            seconds_since_heartbeat: self.last_heartbeat().elapsed().as_secs(),
            closed: self.is_closed().await,
            stats: self.stats.snapshot(),
        }
    }
}
