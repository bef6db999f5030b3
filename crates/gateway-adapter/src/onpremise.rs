//! On-premise adapter
//!
//! Talks to a self-hosted gateway's control API. Every call resolves the
//! gateway record, decrypts its credentials and builds its own HTTP client
//! for the target URL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use acp_core::crypto::{decrypt_credentials, GatewayCredentials, KEY_SIZE};
use acp_core::gateway::GatewayRepository;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::adapter::GatewayAdapter;
use crate::error::{AdapterError, Result};
use crate::types::{
    AdapterConfig, HealthStatus, PolicyInfo, ProviderDeploymentConfig, ProviderDeploymentResult,
    ProviderStatus,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OnPremiseAdapter {
    repository: Arc<dyn GatewayRepository>,
    encryption_key: [u8; KEY_SIZE],
    timeout: Duration,
    health_check_timeout: Duration,
}

/// Everything needed to address one gateway for the duration of a call
struct GatewayTarget {
    client: Client,
    base_url: String,
    authorization: String,
}

impl GatewayTarget {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn provider_url(&self, provider_id: &str) -> String {
        self.url(&format!("/llm-providers/{}", urlencoding::encode(provider_id)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, &self.authorization)
    }
}

impl OnPremiseAdapter {
    pub const TYPE: &'static str = "on-premise";

    /// Build from `timeoutSecs` and `healthCheckTimeoutSecs`
    pub fn new(
        config: &AdapterConfig,
        repository: Arc<dyn GatewayRepository>,
        encryption_key: [u8; KEY_SIZE],
    ) -> Result<Self> {
        let timeout = config
            .u64_param("timeoutSecs")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let health_check_timeout = config
            .u64_param("healthCheckTimeoutSecs")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT);

        Ok(Self {
            repository,
            encryption_key,
            timeout,
            health_check_timeout,
        })
    }

    fn http_client(timeout: Duration) -> Result<Client> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::configuration(format!("failed to build HTTP client: {}", e)))
    }

    async fn gateway_target(&self, gateway_id: &str) -> Result<GatewayTarget> {
        let gateway = self.repository.get_gateway(gateway_id).await?;

        let blob = gateway
            .encrypted_credentials
            .as_deref()
            .filter(|blob| !blob.is_empty())
            .ok_or_else(|| {
                AdapterError::configuration(format!("gateway {} has no credentials stored", gateway_id))
            })?;
        let credentials = decrypt_credentials(blob, &self.encryption_key)?;

        let base_url = gateway
            .control_plane_url()
            .ok_or_else(|| {
                AdapterError::configuration("controlPlaneUrl not found in gateway adapter config")
            })?
            .trim_end_matches('/')
            .to_string();

        Ok(GatewayTarget {
            client: Self::http_client(self.timeout)?,
            base_url,
            authorization: basic_auth(&credentials),
        })
    }
}

fn basic_auth(credentials: &GatewayCredentials) -> String {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", credentials.username, credentials.password));
    format!("Basic {}", encoded)
}

async fn send(request: RequestBuilder, operation: &str) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| AdapterError::unreachable(format!("{} request failed", operation), e))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| AdapterError::invalid_response(e.to_string()))
}

fn ensure_status(response: &Response, operation: &str, accepted: &[StatusCode]) -> Result<()> {
    let status = response.status();
    if accepted.contains(&status) {
        Ok(())
    } else {
        Err(AdapterError::request_failed(operation, status.as_u16()))
    }
}

fn provider_not_found(response: &Response, provider_id: &str) -> Result<()> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(AdapterError::ProviderNotFound {
            provider_id: provider_id.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProviderMutationResponse {
    id: Option<String>,
    status: Option<String>,
}

impl ProviderMutationResponse {
    fn into_result(self) -> ProviderDeploymentResult {
        ProviderDeploymentResult {
            deployment_id: self.id.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            deployed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderDetailResponse {
    provider: Option<ProviderDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderDetail {
    id: Option<String>,
    configuration: Option<ProviderConfiguration>,
    deployment_status: Option<String>,
    metadata: Option<ProviderMetadata>,
}

#[derive(Debug, Deserialize)]
struct ProviderConfiguration {
    kind: Option<String>,
    metadata: Option<ConfigurationMetadata>,
    spec: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationMetadata {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderMetadata {
    deployed_at: Option<DateTime<Utc>>,
}

impl From<ProviderDetail> for ProviderStatus {
    fn from(detail: ProviderDetail) -> Self {
        let (name, kind, spec) = match detail.configuration {
            Some(configuration) => (
                configuration.metadata.and_then(|m| m.name).unwrap_or_default(),
                configuration.kind.unwrap_or_default(),
                configuration.spec,
            ),
            None => (String::new(), String::new(), None),
        };

        ProviderStatus {
            id: detail.id.unwrap_or_default(),
            name,
            kind,
            status: detail.deployment_status.unwrap_or_default(),
            deployed_at: detail.metadata.and_then(|m| m.deployed_at),
            spec,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderListResponse {
    #[serde(default)]
    providers: Vec<ProviderListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderListItem {
    id: Option<String>,
    display_name: Option<String>,
    template: Option<String>,
    status: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<ProviderListItem> for ProviderStatus {
    fn from(item: ProviderListItem) -> Self {
        ProviderStatus {
            id: item.id.unwrap_or_default(),
            name: item.display_name.unwrap_or_default(),
            kind: item.template.unwrap_or_default(),
            status: item.status.unwrap_or_default(),
            deployed_at: item.created_at,
            spec: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolicyListResponse {
    #[serde(default)]
    policies: Option<Vec<PolicyListItem>>,
}

#[derive(Debug, Deserialize)]
struct PolicyListItem {
    name: String,
    description: Option<String>,
    parameters: Option<Map<String, Value>>,
}

#[async_trait]
impl GatewayAdapter for OnPremiseAdapter {
    fn adapter_type(&self) -> &str {
        Self::TYPE
    }

    async fn validate_gateway_endpoint(&self, control_plane_url: &str) -> Result<()> {
        let client = Self::http_client(self.health_check_timeout)?;
        let url = format!("{}/health", control_plane_url.trim_end_matches('/'));

        let response = send(client.get(url), "gateway health check").await?;
        ensure_status(&response, "gateway health check", &[StatusCode::OK])
    }

    async fn check_health(&self, control_plane_url: &str) -> Result<HealthStatus> {
        let start = Instant::now();
        let result = self.validate_gateway_endpoint(control_plane_url).await;
        let response_time = start.elapsed();

        match result {
            Ok(()) => Ok(HealthStatus::active(response_time)),
            Err(err @ AdapterError::Unreachable { .. }) => Err(err),
            Err(err) => {
                debug!(
                    "Gateway health check reported error url={} error={}",
                    control_plane_url, err
                );
                Ok(HealthStatus::error(response_time, err.to_string()))
            }
        }
    }

    async fn deploy_provider(
        &self,
        gateway_id: &str,
        config: &ProviderDeploymentConfig,
    ) -> Result<ProviderDeploymentResult> {
        info!(
            "Deploying provider to gateway gateway_id={} handle={}",
            gateway_id, config.handle
        );
        let target = self.gateway_target(gateway_id).await?;

        let request = target
            .authorized(target.client.post(target.url("/llm-providers")))
            .json(&config.configuration);
        let response = send(request, "create provider").await?;
        ensure_status(
            &response,
            "create provider",
            &[StatusCode::OK, StatusCode::CREATED],
        )?;

        let body: ProviderMutationResponse = decode(response).await?;
        Ok(body.into_result())
    }

    async fn update_provider(
        &self,
        gateway_id: &str,
        provider_id: &str,
        config: &ProviderDeploymentConfig,
    ) -> Result<ProviderDeploymentResult> {
        info!(
            "Updating provider on gateway gateway_id={} provider_id={}",
            gateway_id, provider_id
        );
        let target = self.gateway_target(gateway_id).await?;

        let request = target
            .authorized(target.client.put(target.provider_url(provider_id)))
            .json(&config.configuration);
        let response = send(request, "update provider").await?;
        provider_not_found(&response, provider_id)?;
        ensure_status(&response, "update provider", &[StatusCode::OK])?;

        let body: ProviderMutationResponse = decode(response).await?;
        Ok(body.into_result())
    }

    async fn undeploy_provider(&self, gateway_id: &str, provider_id: &str) -> Result<()> {
        info!(
            "Undeploying provider from gateway gateway_id={} provider_id={}",
            gateway_id, provider_id
        );
        let target = self.gateway_target(gateway_id).await?;

        let request = target.authorized(target.client.delete(target.provider_url(provider_id)));
        let response = send(request, "delete provider").await?;
        provider_not_found(&response, provider_id)?;
        ensure_status(
            &response,
            "delete provider",
            &[StatusCode::OK, StatusCode::NO_CONTENT],
        )
    }

    async fn get_provider_status(
        &self,
        gateway_id: &str,
        provider_id: &str,
    ) -> Result<ProviderStatus> {
        let target = self.gateway_target(gateway_id).await?;

        let request = target.authorized(target.client.get(target.provider_url(provider_id)));
        let response = send(request, "get provider").await?;
        provider_not_found(&response, provider_id)?;
        ensure_status(&response, "get provider", &[StatusCode::OK])?;

        let body: ProviderDetailResponse = decode(response).await?;
        body.provider
            .map(ProviderStatus::from)
            .ok_or_else(|| AdapterError::invalid_response("provider data not found in response"))
    }

    async fn list_providers(&self, gateway_id: &str) -> Result<Vec<ProviderStatus>> {
        let target = self.gateway_target(gateway_id).await?;

        let request = target.authorized(target.client.get(target.url("/llm-providers")));
        let response = send(request, "list providers").await?;
        ensure_status(&response, "list providers", &[StatusCode::OK])?;

        let body: ProviderListResponse = decode(response).await?;
        Ok(body.providers.into_iter().map(ProviderStatus::from).collect())
    }

    async fn get_policies(&self, gateway_id: &str) -> Result<Vec<PolicyInfo>> {
        let target = self.gateway_target(gateway_id).await?;

        let request = target.authorized(target.client.get(target.url("/policies")));
        let response = send(request, "list policies").await?;
        ensure_status(&response, "list policies", &[StatusCode::OK])?;

        let body: PolicyListResponse = decode(response).await?;
        Ok(body
            .policies
            .unwrap_or_default()
            .into_iter()
            .map(|policy| PolicyInfo {
                name: policy.name,
                // list endpoint carries no version
                version: String::new(),
                description: policy.description.unwrap_or_default(),
                parameters: policy.parameters.unwrap_or_default(),
            })
            .collect())
    }
}
