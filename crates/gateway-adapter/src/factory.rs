//! Adapter factory
//!
//! Maps adapter type names to constructors. This is the only place a concrete
//! adapter type is chosen.

use std::collections::HashMap;
use std::sync::Arc;

use acp_core::crypto::KEY_SIZE;
use acp_core::gateway::GatewayRepository;
use tracing::debug;

use crate::adapter::GatewayAdapter;
use crate::error::{AdapterError, Result};
use crate::mock::MockAdapter;
use crate::onpremise::OnPremiseAdapter;
use crate::types::AdapterConfig;

/// Builds an adapter from its configuration
pub type AdapterConstructor =
    Arc<dyn Fn(&AdapterConfig) -> Result<Arc<dyn GatewayAdapter>> + Send + Sync>;

/// Registry of named adapter constructors
#[derive(Clone, Default)]
pub struct AdapterFactory {
    adapters: HashMap<String, AdapterConstructor>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. A later registration for the same type replaces
    /// the earlier one.
    pub fn register<F>(&mut self, adapter_type: impl Into<String>, constructor: F)
    where
        F: Fn(&AdapterConfig) -> Result<Arc<dyn GatewayAdapter>> + Send + Sync + 'static,
    {
        let adapter_type = adapter_type.into();
        debug!("Registering gateway adapter type={}", adapter_type);
        self.adapters.insert(adapter_type, Arc::new(constructor));
    }

    /// Instantiate the adapter named by `config.adapter_type`
    pub fn create_adapter(&self, config: &AdapterConfig) -> Result<Arc<dyn GatewayAdapter>> {
        let constructor = self.adapters.get(&config.adapter_type).ok_or_else(|| {
            AdapterError::UnsupportedAdapterType {
                adapter_type: config.adapter_type.clone(),
            }
        })?;
        constructor(config)
    }

    pub fn supported_types(&self) -> Vec<String> {
        let mut types = self.adapters.keys().cloned().collect::<Vec<_>>();
        types.sort();
        types
    }
}

/// Register the built-in `on-premise` and `mock` adapters
pub fn register_default_adapters(
    factory: &mut AdapterFactory,
    repository: Arc<dyn GatewayRepository>,
    encryption_key: [u8; KEY_SIZE],
) {
    factory.register(OnPremiseAdapter::TYPE, move |config| {
        let adapter = OnPremiseAdapter::new(config, Arc::clone(&repository), encryption_key)?;
        Ok(Arc::new(adapter) as Arc<dyn GatewayAdapter>)
    });

    factory.register(MockAdapter::TYPE, |config| {
        Ok(Arc::new(MockAdapter::from_config(config)) as Arc<dyn GatewayAdapter>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use acp_core::gateway::FileGatewayStore;
    use tempfile::TempDir;

    async fn default_factory() -> (AdapterFactory, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileGatewayStore::new(temp_dir.path().join("gateways"))
            .await
            .unwrap();
        let mut factory = AdapterFactory::new();
        register_default_adapters(&mut factory, Arc::new(store), [7_u8; KEY_SIZE]);
        (factory, temp_dir)
    }

    #[tokio::test]
    async fn unknown_type_is_unsupported() {
        let (factory, _temp_dir) = default_factory().await;
        let result = factory.create_adapter(&AdapterConfig::new("unknown"));
        match result {
            Err(AdapterError::UnsupportedAdapterType { adapter_type }) => {
                assert_eq!(adapter_type, "unknown")
            }
            Err(other) => panic!("Expected UnsupportedAdapterType, got: {:?}", other),
            Ok(_) => panic!("Expected UnsupportedAdapterType, got an adapter"),
        }
    }

    #[tokio::test]
    async fn default_adapters_are_registered() {
        let (factory, _temp_dir) = default_factory().await;
        assert_eq!(factory.supported_types(), vec!["mock", "on-premise"]);

        let on_prem = factory
            .create_adapter(&AdapterConfig::new("on-premise"))
            .unwrap();
        assert_eq!(on_prem.adapter_type(), "on-premise");

        let mock = factory
            .create_adapter(&AdapterConfig::new("mock").with_parameter("adapterType", "cloud-sim"))
            .unwrap();
        assert_eq!(mock.adapter_type(), "cloud-sim");
    }

    #[test]
    fn last_registration_wins() {
        let mut factory = AdapterFactory::new();
        factory.register("mock", |_| {
            Ok(Arc::new(MockAdapter::new("first", false)) as Arc<dyn GatewayAdapter>)
        });
        factory.register("mock", |_| {
            Ok(Arc::new(MockAdapter::new("second", false)) as Arc<dyn GatewayAdapter>)
        });

        let adapter = factory.create_adapter(&AdapterConfig::new("mock")).unwrap();
        assert_eq!(adapter.adapter_type(), "second");
        assert_eq!(factory.supported_types().len(), 1);
    }

    #[test]
    fn constructor_errors_are_returned() {
        let mut factory = AdapterFactory::new();
        factory.register("broken", |_| Err(AdapterError::configuration("missing key")));

        let err = factory
            .create_adapter(&AdapterConfig::new("broken"))
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::Configuration { .. }));
    }
}
