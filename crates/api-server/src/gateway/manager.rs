//! Connection Manager - registry of live gateway connections
//!
//! Every registered connection gets its own heartbeat task. Shutdown cancels
//! all of them, closes every connection and waits for the tasks to exit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionInfo};
use super::protocol::{CLOSE_GOING_AWAY, CLOSE_NORMAL};
use super::transport::Transport;

/// Deadline for writing one keep-alive ping
const PING_WRITE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("maximum connections reached ({max})")]
    CapacityExceeded { max: usize },

    #[error("connection manager is shutting down")]
    ShuttingDown,
}

/// A refused registration. Hands the transport back so the caller can tell
/// the peer why before closing it.
pub struct RegisterRejection {
    pub error: RegistryError,
    pub transport: Box<dyn Transport>,
}

impl fmt::Debug for RegisterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRejection")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Aggregate registry counters
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub total_connections: usize,
    pub total_gateways: usize,
    pub total_events_sent: u64,
    pub total_failed_events: u64,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    connections: DashMap<String, Vec<Arc<Connection>>>,
    // Serializes structural changes to `connections`
    connection_count: Mutex<usize>,
    max_connections: usize,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    shutdown: CancellationToken,
    heartbeats: TaskTracker,
}

impl ConnectionManager {
    pub fn new(
        max_connections: usize,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connections: DashMap::new(),
                connection_count: Mutex::new(0),
                max_connections,
                heartbeat_interval,
                heartbeat_timeout,
                shutdown: CancellationToken::new(),
                heartbeats: TaskTracker::new(),
            }),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Register a new connection for `gateway_id` and start its heartbeat.
    ///
    /// Several connections per gateway are allowed. Nothing is evicted when
    /// the ceiling is reached.
    pub async fn register(
        &self,
        gateway_id: &str,
        transport: Box<dyn Transport>,
        auth_token: &str,
    ) -> Result<Arc<Connection>, RegisterRejection> {
        let connection = {
            let mut count = self.inner.connection_count.lock().await;
            if self.inner.shutdown.is_cancelled() {
                return Err(RegisterRejection {
                    error: RegistryError::ShuttingDown,
                    transport,
                });
            }
            if *count >= self.inner.max_connections {
                warn!(
                    "Connection limit reached gateway_id={} max={}",
                    gateway_id, self.inner.max_connections
                );
                return Err(RegisterRejection {
                    error: RegistryError::CapacityExceeded {
                        max: self.inner.max_connections,
                    },
                    transport,
                });
            }

            let connection = Arc::new(Connection::new(gateway_id, transport, auth_token));
            self.inner
                .connections
                .entry(gateway_id.to_string())
                .or_default()
                .push(Arc::clone(&connection));
            *count += 1;
            connection
        };

        connection.install_pong_handler(self.inner.heartbeat_timeout);
        self.spawn_heartbeat(Arc::clone(&connection));

        info!(
            "Gateway connection registered gateway_id={} connection_id={}",
            gateway_id,
            connection.connection_id()
        );
        Ok(connection)
    }

    /// Remove one connection and close it. Unknown ids are ignored.
    pub async fn unregister(&self, gateway_id: &str, connection_id: &str) {
        let removed = {
            let mut count = self.inner.connection_count.lock().await;
            let removed = match self.inner.connections.get_mut(gateway_id) {
                Some(mut entry) => entry
                    .iter()
                    .position(|conn| conn.connection_id() == connection_id)
                    .map(|index| entry.remove(index)),
                None => None,
            };
            if removed.is_some() {
                *count = count.saturating_sub(1);
                self.inner
                    .connections
                    .remove_if(gateway_id, |_, conns| conns.is_empty());
            }
            removed
        };

        let Some(connection) = removed else {
            return;
        };

        if let Err(e) = connection.close(CLOSE_NORMAL, "normal closure").await {
            debug!(
                "Close after unregister failed gateway_id={} connection_id={} error={}",
                gateway_id, connection_id, e
            );
        }
        info!(
            "Gateway connection unregistered gateway_id={} connection_id={}",
            gateway_id, connection_id
        );
    }

    fn spawn_heartbeat(&self, connection: Arc<Connection>) {
        let manager = self.clone();
        self.inner
            .heartbeats
            .spawn(async move { manager.supervise(connection).await });
    }

    async fn supervise(&self, connection: Arc<Connection>) {
        let interval = self.inner.heartbeat_interval;
        let timeout = self.inner.heartbeat_timeout;
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                _ = connection.closed() => return,
                _ = ticker.tick() => {}
            }

            let since_heartbeat = connection.last_heartbeat().elapsed();
            if since_heartbeat > timeout {
                warn!(
                    "Heartbeat timeout gateway_id={} connection_id={} since_heartbeat_ms={}",
                    connection.gateway_id(),
                    connection.connection_id(),
                    since_heartbeat.as_millis()
                );
                self.unregister(connection.gateway_id(), connection.connection_id())
                    .await;
                return;
            }

            if let Err(e) = connection.send_ping(PING_WRITE_WAIT).await {
                warn!(
                    "Heartbeat ping failed gateway_id={} connection_id={} error={}",
                    connection.gateway_id(),
                    connection.connection_id(),
                    e
                );
                self.unregister(connection.gateway_id(), connection.connection_id())
                    .await;
                return;
            }
        }
    }

    /// Stop supervision, close every connection and wait for all heartbeat
    /// tasks to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down connection manager");
        self.inner.shutdown.cancel();

        let drained = {
            let mut count = self.inner.connection_count.lock().await;
            let drained: Vec<Arc<Connection>> = self
                .inner
                .connections
                .iter()
                .flat_map(|entry| entry.value().clone())
                .collect();
            self.inner.connections.clear();
            *count = 0;
            drained
        };

        let closed = drained.len();
        join_all(drained.iter().map(|connection| async move {
            if let Err(e) = connection.close(CLOSE_GOING_AWAY, "server shutdown").await {
                debug!(
                    "Close on shutdown failed gateway_id={} connection_id={} error={}",
                    connection.gateway_id(),
                    connection.connection_id(),
                    e
                );
            }
        }))
        .await;

        self.inner.heartbeats.close();
        self.inner.heartbeats.wait().await;
        info!("Connection manager stopped closed_connections={}", closed);
    }

    /// Live connections of one gateway
    pub fn connections(&self, gateway_id: &str) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .get(gateway_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        *self.inner.connection_count.lock().await
    }

    pub async fn has_capacity(&self) -> bool {
        self.connection_count().await < self.inner.max_connections
    }

    pub fn gateway_ids(&self) -> Vec<String> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub async fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            total_connections: self.connection_count().await,
            ..ManagerStats::default()
        };
        for entry in self.inner.connections.iter() {
            stats.total_gateways += 1;
            for connection in entry.value() {
                stats.total_events_sent += connection.stats().total_sent();
                stats.total_failed_events += connection.stats().failed_deliveries();
            }
        }
        stats
    }

    pub async fn connections_info(&self) -> Vec<ConnectionInfo> {
        let connections: Vec<Arc<Connection>> = self
            .inner
            .connections
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();

        let mut infos = Vec::with_capacity(connections.len());
        for connection in connections {
            infos.push(connection.info().await);
        }
        infos
    }
}
