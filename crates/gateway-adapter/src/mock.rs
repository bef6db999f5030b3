//! Mock adapter
//!
//! Deterministic in-memory backend for tests and local development. With
//! `should_fail` set, every operation fails with the configured message.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::GatewayAdapter;
use crate::error::{AdapterError, Result};
use crate::types::{
    AdapterConfig, HealthStatus, PolicyInfo, ProviderDeploymentConfig, ProviderDeploymentResult,
    ProviderStatus,
};

const DEFAULT_FAIL_MESSAGE: &str = "mock adapter failure";
const DEFAULT_RESPONSE_TIME: Duration = Duration::from_millis(10);

pub struct MockAdapter {
    adapter_type: String,
    should_fail: bool,
    fail_message: String,
    response_time: Duration,
    // (gateway_id, provider_id) -> status
    providers: Mutex<BTreeMap<(String, String), ProviderStatus>>,
}

impl MockAdapter {
    pub const TYPE: &'static str = "mock";

    pub fn new(adapter_type: impl Into<String>, should_fail: bool) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            should_fail,
            fail_message: DEFAULT_FAIL_MESSAGE.to_string(),
            response_time: DEFAULT_RESPONSE_TIME,
            providers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Build from `shouldFail`, `adapterType`, `failMessage` and `responseTimeMs`
    pub fn from_config(config: &AdapterConfig) -> Self {
        let adapter_type = config
            .str_param("adapterType")
            .unwrap_or(Self::TYPE)
            .to_string();
        let mut adapter = Self::new(adapter_type, config.bool_param("shouldFail").unwrap_or(false));
        if let Some(message) = config.str_param("failMessage") {
            adapter.fail_message = message.to_string();
        }
        if let Some(millis) = config.u64_param("responseTimeMs") {
            adapter.response_time = Duration::from_millis(millis);
        }
        adapter
    }

    pub fn with_fail_message(mut self, message: impl Into<String>) -> Self {
        self.fail_message = message.into();
        self
    }

    fn check_failure(&self, context: &str) -> Result<()> {
        if self.should_fail {
            return Err(AdapterError::failure(format!(
                "{}: {}",
                self.fail_message, context
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayAdapter for MockAdapter {
    fn adapter_type(&self) -> &str {
        if self.adapter_type.is_empty() {
            Self::TYPE
        } else {
            &self.adapter_type
        }
    }

    async fn validate_gateway_endpoint(&self, control_plane_url: &str) -> Result<()> {
        self.check_failure(control_plane_url)?;
        debug!("Mock gateway validation successful url={}", control_plane_url);
        Ok(())
    }

    async fn check_health(&self, control_plane_url: &str) -> Result<HealthStatus> {
        let start = Instant::now();
        let result = self.validate_gateway_endpoint(control_plane_url).await;

        let response_time = if self.response_time.is_zero() {
            start.elapsed()
        } else {
            self.response_time
        };

        Ok(match result {
            Ok(()) => HealthStatus::active(response_time),
            Err(err) => HealthStatus::error(response_time, err.to_string()),
        })
    }

    async fn deploy_provider(
        &self,
        gateway_id: &str,
        config: &ProviderDeploymentConfig,
    ) -> Result<ProviderDeploymentResult> {
        self.check_failure(gateway_id)?;

        let deployment_id = format!("mock-{}", config.handle);
        let deployed_at = Utc::now();
        let status = ProviderStatus {
            id: deployment_id.clone(),
            name: config
                .display_name
                .clone()
                .unwrap_or_else(|| config.handle.clone()),
            kind: config.template.clone().unwrap_or_default(),
            status: "deployed".to_string(),
            deployed_at: Some(deployed_at),
            spec: config.configuration.as_object().cloned(),
        };

        self.providers
            .lock()
            .await
            .insert((gateway_id.to_string(), deployment_id.clone()), status);

        Ok(ProviderDeploymentResult {
            deployment_id,
            status: "deployed".to_string(),
            deployed_at,
        })
    }

    async fn update_provider(
        &self,
        gateway_id: &str,
        provider_id: &str,
        config: &ProviderDeploymentConfig,
    ) -> Result<ProviderDeploymentResult> {
        self.check_failure(gateway_id)?;

        let mut providers = self.providers.lock().await;
        let existing = providers
            .get_mut(&(gateway_id.to_string(), provider_id.to_string()))
            .ok_or_else(|| AdapterError::ProviderNotFound {
                provider_id: provider_id.to_string(),
            })?;

        let deployed_at = Utc::now();
        if let Some(name) = &config.display_name {
            existing.name = name.clone();
        }
        existing.spec = config.configuration.as_object().cloned();
        existing.deployed_at = Some(deployed_at);

        Ok(ProviderDeploymentResult {
            deployment_id: provider_id.to_string(),
            status: existing.status.clone(),
            deployed_at,
        })
    }

    async fn undeploy_provider(&self, gateway_id: &str, provider_id: &str) -> Result<()> {
        self.check_failure(gateway_id)?;

        self.providers
            .lock()
            .await
            .remove(&(gateway_id.to_string(), provider_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| AdapterError::ProviderNotFound {
                provider_id: provider_id.to_string(),
            })
    }

    async fn get_provider_status(
        &self,
        gateway_id: &str,
        provider_id: &str,
    ) -> Result<ProviderStatus> {
        self.check_failure(gateway_id)?;

        self.providers
            .lock()
            .await
            .get(&(gateway_id.to_string(), provider_id.to_string()))
            .cloned()
            .ok_or_else(|| AdapterError::ProviderNotFound {
                provider_id: provider_id.to_string(),
            })
    }

    async fn list_providers(&self, gateway_id: &str) -> Result<Vec<ProviderStatus>> {
        self.check_failure(gateway_id)?;

        let providers = self.providers.lock().await;
        Ok(providers
            .iter()
            .filter(|((gateway, _), _)| gateway == gateway_id)
            .map(|(_, status)| status.clone())
            .collect())
    }

    async fn get_policies(&self, gateway_id: &str) -> Result<Vec<PolicyInfo>> {
        self.check_failure(gateway_id)?;

        Ok(vec![
            PolicyInfo {
                name: "ModelRateLimit".to_string(),
                version: "v1".to_string(),
                description: "Token based rate limiting per model".to_string(),
                parameters: Map::new(),
            },
            PolicyInfo {
                name: "ContentGuardrail".to_string(),
                version: "v1".to_string(),
                description: "Blocks prompts matching configured patterns".to_string(),
                parameters: Map::new(),
            },
        ])
    }

    async fn close(&self) -> Result<()> {
        debug!("Mock adapter closed");
        Ok(())
    }
}
