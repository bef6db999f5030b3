//! Application state

use std::sync::Arc;

use acp_core::crypto::KEY_SIZE;
use acp_core::gateway::{FileGatewayStore, GatewayRecord, GatewayRepository};
use dashmap::DashMap;
use gateway_adapter::{register_default_adapters, AdapterConfig, AdapterFactory, GatewayAdapter};
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::gateway::{ConnectRateLimiter, ConnectionManager, GatewayEventsService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    encryption_key: [u8; KEY_SIZE],
    gateway_store: FileGatewayStore,
    manager: ConnectionManager,
    events: GatewayEventsService,
    adapters: AdapterFactory,
    // gateway id -> adapter built from that gateway's stored config
    live_adapters: DashMap<String, Arc<dyn GatewayAdapter>>,
    rate_limiter: ConnectRateLimiter,
}

impl AppState {
    /// Open the gateway store under the data directory and wire the services
    pub async fn new(config: ServerConfig, encryption_key: [u8; KEY_SIZE]) -> acp_core::Result<Self> {
        let gateway_store = FileGatewayStore::new(config.data_dir.join("gateways")).await?;

        let manager = ConnectionManager::new(
            config.max_connections,
            config.heartbeat_interval,
            config.heartbeat_timeout,
        );
        let events = GatewayEventsService::new(manager.clone());

        let repository: Arc<dyn GatewayRepository> = Arc::new(gateway_store.clone());
        let mut adapters = AdapterFactory::new();
        register_default_adapters(&mut adapters, repository, encryption_key);

        let rate_limiter = ConnectRateLimiter::new(config.connect_rate_limit);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                encryption_key,
                gateway_store,
                manager,
                events,
                adapters,
                live_adapters: DashMap::new(),
                rate_limiter,
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.inner.encryption_key
    }

    pub fn gateway_store(&self) -> &FileGatewayStore {
        &self.inner.gateway_store
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    pub fn events(&self) -> &GatewayEventsService {
        &self.inner.events
    }

    pub fn adapters(&self) -> &AdapterFactory {
        &self.inner.adapters
    }

    pub fn rate_limiter(&self) -> &ConnectRateLimiter {
        &self.inner.rate_limiter
    }

    /// The adapter serving `record`, built on first use and reused until
    /// the gateway's adapter config changes or the gateway is deleted
    pub fn adapter_for(
        &self,
        record: &GatewayRecord,
    ) -> gateway_adapter::Result<Arc<dyn GatewayAdapter>> {
        let gateway_id = record.id.to_string();
        let adapter = self
            .inner
            .live_adapters
            .entry(gateway_id)
            .or_try_insert_with(|| {
                debug!(
                    "Building gateway adapter gateway_id={} adapter_type={}",
                    record.id, record.adapter_type
                );
                self.inner.adapters.create_adapter(&AdapterConfig {
                    adapter_type: record.adapter_type.clone(),
                    parameters: record.adapter_config.clone(),
                })
            })?;
        Ok(Arc::clone(adapter.value()))
    }

    /// Drop the cached adapter of a gateway and release its resources
    pub async fn evict_adapter(&self, gateway_id: &str) {
        let Some((_, adapter)) = self.inner.live_adapters.remove(gateway_id) else {
            return;
        };
        if let Err(e) = adapter.close().await {
            warn!(
                "Failed to close gateway adapter gateway_id={} error={}",
                gateway_id, e
            );
        }
    }
}
