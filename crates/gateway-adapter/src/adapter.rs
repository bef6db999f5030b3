//! Gateway adapter trait
//!
//! Defines the capability set used to manage a remote gateway.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    HealthStatus, PolicyInfo, ProviderDeploymentConfig, ProviderDeploymentResult, ProviderStatus,
};

/// Remote management capabilities for one class of gateway deployment
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Type name this adapter was registered under
    fn adapter_type(&self) -> &str;

    /// Check that a control API answers on `control_plane_url`
    async fn validate_gateway_endpoint(&self, control_plane_url: &str) -> Result<()>;

    /// Check the control API and report latency.
    ///
    /// An endpoint that answers but is unhealthy yields `Ok` with an error
    /// status; only transport failures are returned as `Err`.
    async fn check_health(&self, control_plane_url: &str) -> Result<HealthStatus>;

    /// Deploy a provider to the gateway
    async fn deploy_provider(
        &self,
        gateway_id: &str,
        config: &ProviderDeploymentConfig,
    ) -> Result<ProviderDeploymentResult>;

    /// Replace the configuration of a deployed provider
    async fn update_provider(
        &self,
        gateway_id: &str,
        provider_id: &str,
        config: &ProviderDeploymentConfig,
    ) -> Result<ProviderDeploymentResult>;

    /// Remove a provider from the gateway
    async fn undeploy_provider(&self, gateway_id: &str, provider_id: &str) -> Result<()>;

    async fn get_provider_status(
        &self,
        gateway_id: &str,
        provider_id: &str,
    ) -> Result<ProviderStatus>;

    async fn list_providers(&self, gateway_id: &str) -> Result<Vec<ProviderStatus>>;

    async fn get_policies(&self, gateway_id: &str) -> Result<Vec<PolicyInfo>>;

    /// Release adapter resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
