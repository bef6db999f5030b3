//! Gateway API endpoints
//!
//! Gateway CRUD backed by the gateway store, and remote provider management
//! routed through the adapter selected by each gateway's `adapterType`.
//! Successful provider changes are announced to the gateway as
//! `config.updated`.

use std::sync::Arc;

use acp_core::crypto::{encrypt_credentials, GatewayCredentials};
use acp_core::gateway::{
    GatewayRecord, GatewayRepository, GatewaySummary, IssuedGatewayKey, NewGateway,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use gateway_adapter::{
    AdapterError, GatewayAdapter, HealthStatus, PolicyInfo,
    ProviderDeploymentConfig, ProviderDeploymentResult, ProviderStatus,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::{api_error, map_adapter_error, map_store_error, RouteError};
use crate::gateway::GatewayConfigEvent;
use crate::state::AppState;

const PROVIDER_CONFIG_TYPE: &str = "llm-provider";
const GATEWAY_CONFIG_TYPE: &str = "gateway";

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGatewayRequest {
    pub name: String,
    #[serde(default)]
    pub adapter_type: Option<String>,
    #[serde(default)]
    pub adapter_config: Map<String, Value>,
    #[serde(default)]
    pub credentials: Option<CredentialsRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAdapterConfigRequest {
    pub adapter_config: Map<String, Value>,
}

// ============================================================================
// Gateway CRUD
// ============================================================================

async fn create_gateway(
    State(state): State<AppState>,
    Json(req): Json<CreateGatewayRequest>,
) -> Result<(StatusCode, Json<IssuedGatewayKey>), RouteError> {
    let mut new = NewGateway::new(req.name);
    if let Some(adapter_type) = req.adapter_type {
        ensure_supported(&state, &adapter_type)?;
        new = new.with_adapter_type(adapter_type);
    }
    new.adapter_config = req.adapter_config;
    if let Some(credentials) = req.credentials {
        new = new.with_encrypted_credentials(seal_credentials(&state, credentials)?);
    }

    let issued = state
        .gateway_store()
        .create_gateway(new)
        .await
        .map_err(map_store_error)?;
    info!(
        "Gateway created gateway_id={} adapter_type={}",
        issued.gateway.id, issued.gateway.adapter_type
    );
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn list_gateways(State(state): State<AppState>) -> Json<Vec<GatewaySummary>> {
    Json(state.gateway_store().list_gateways().await)
}

async fn delete_gateway(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
) -> Result<StatusCode, RouteError> {
    let record = state
        .gateway_store()
        .get_gateway(&gateway_id)
        .await
        .map_err(map_store_error)?;
    let gateway_id = record.id.to_string();
    state
        .gateway_store()
        .delete_gateway(&gateway_id)
        .await
        .map_err(map_store_error)?;

    // a deleted gateway keeps no live connections
    for connection in state.manager().connections(&gateway_id) {
        state
            .manager()
            .unregister(&gateway_id, connection.connection_id())
            .await;
    }
    state.evict_adapter(&gateway_id).await;
    info!("Gateway deleted gateway_id={}", gateway_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn rotate_api_key(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
) -> Result<Json<IssuedGatewayKey>, RouteError> {
    let issued = state
        .gateway_store()
        .rotate_api_key(&gateway_id)
        .await
        .map_err(map_store_error)?;
    let gateway_id = issued.gateway.id.to_string();
    info!("Gateway API key rotated gateway_id={}", gateway_id);

    // connections authenticated with the revoked key must reconnect
    for connection in state.manager().connections(&gateway_id) {
        if connection.auth_token() != issued.api_key {
            state
                .manager()
                .unregister(&gateway_id, connection.connection_id())
                .await;
        }
    }
    Ok(Json(issued))
}

async fn update_credentials(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<GatewaySummary>, RouteError> {
    let blob = seal_credentials(&state, req)?;
    let summary = state
        .gateway_store()
        .set_credentials(&gateway_id, blob)
        .await
        .map_err(map_store_error)?;
    Ok(Json(summary))
}

async fn update_adapter_config(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    Json(req): Json<UpdateAdapterConfigRequest>,
) -> Result<Json<GatewaySummary>, RouteError> {
    let summary = state
        .gateway_store()
        .update_adapter_config(&gateway_id, req.adapter_config)
        .await
        .map_err(map_store_error)?;
    state.evict_adapter(&summary.id.to_string()).await;
    announce_config_change(&state, &gateway_id, GATEWAY_CONFIG_TYPE, "updated").await;
    Ok(Json(summary))
}

// ============================================================================
// Adapter operations
// ============================================================================

async fn gateway_health(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
) -> Result<Json<HealthStatus>, RouteError> {
    let (record, adapter) = resolve_adapter(&state, &gateway_id).await?;
    let url = record.control_plane_url().ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "gateway has no control plane URL configured",
        )
    })?;
    let health = adapter.check_health(url).await.map_err(map_adapter_error)?;
    if !health.is_active() {
        warn!(
            "Gateway unhealthy gateway_id={} error={}",
            gateway_id,
            health.error_message.as_deref().unwrap_or("unknown")
        );
    }
    Ok(Json(health))
}

async fn deploy_provider(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    Json(config): Json<ProviderDeploymentConfig>,
) -> Result<(StatusCode, Json<ProviderDeploymentResult>), RouteError> {
    if config.handle.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "provider handle cannot be empty",
        ));
    }
    let (_, adapter) = resolve_adapter(&state, &gateway_id).await?;
    let result = adapter
        .deploy_provider(&gateway_id, &config)
        .await
        .map_err(map_adapter_error)?;
    info!(
        "Provider deployed gateway_id={} deployment_id={}",
        gateway_id, result.deployment_id
    );
    announce_config_change(&state, &gateway_id, PROVIDER_CONFIG_TYPE, "deployed").await;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn update_provider(
    State(state): State<AppState>,
    Path((gateway_id, provider_id)): Path<(String, String)>,
    Json(config): Json<ProviderDeploymentConfig>,
) -> Result<Json<ProviderDeploymentResult>, RouteError> {
    let (_, adapter) = resolve_adapter(&state, &gateway_id).await?;
    let result = adapter
        .update_provider(&gateway_id, &provider_id, &config)
        .await
        .map_err(map_adapter_error)?;
    announce_config_change(&state, &gateway_id, PROVIDER_CONFIG_TYPE, "updated").await;
    Ok(Json(result))
}

async fn undeploy_provider(
    State(state): State<AppState>,
    Path((gateway_id, provider_id)): Path<(String, String)>,
) -> Result<StatusCode, RouteError> {
    let (_, adapter) = resolve_adapter(&state, &gateway_id).await?;
    adapter
        .undeploy_provider(&gateway_id, &provider_id)
        .await
        .map_err(map_adapter_error)?;
    info!(
        "Provider undeployed gateway_id={} provider_id={}",
        gateway_id, provider_id
    );
    announce_config_change(&state, &gateway_id, PROVIDER_CONFIG_TYPE, "undeployed").await;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_provider(
    State(state): State<AppState>,
    Path((gateway_id, provider_id)): Path<(String, String)>,
) -> Result<Json<ProviderStatus>, RouteError> {
    let (_, adapter) = resolve_adapter(&state, &gateway_id).await?;
    adapter
        .get_provider_status(&gateway_id, &provider_id)
        .await
        .map(Json)
        .map_err(map_adapter_error)
}

async fn list_providers(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
) -> Result<Json<Vec<ProviderStatus>>, RouteError> {
    let (_, adapter) = resolve_adapter(&state, &gateway_id).await?;
    adapter
        .list_providers(&gateway_id)
        .await
        .map(Json)
        .map_err(map_adapter_error)
}

async fn list_policies(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
) -> Result<Json<Vec<PolicyInfo>>, RouteError> {
    let (_, adapter) = resolve_adapter(&state, &gateway_id).await?;
    adapter
        .get_policies(&gateway_id)
        .await
        .map(Json)
        .map_err(map_adapter_error)
}

// ============================================================================
// Helpers
// ============================================================================

fn ensure_supported(state: &AppState, adapter_type: &str) -> Result<(), RouteError> {
    if state
        .adapters()
        .supported_types()
        .iter()
        .any(|supported| supported == adapter_type.trim())
    {
        return Ok(());
    }
    Err(map_adapter_error(AdapterError::UnsupportedAdapterType {
        adapter_type: adapter_type.to_string(),
    }))
}

fn seal_credentials(state: &AppState, req: CredentialsRequest) -> Result<Vec<u8>, RouteError> {
    if req.username.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "credentials username cannot be empty",
        ));
    }
    let credentials = GatewayCredentials::new(req.username, req.password);
    encrypt_credentials(&credentials, state.encryption_key()).map_err(|err| {
        error!("Failed to encrypt gateway credentials: {}", err);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encrypt credentials",
        )
    })
}

/// Load the gateway and build the adapter its record names
async fn resolve_adapter(
    state: &AppState,
    gateway_id: &str,
) -> Result<(GatewayRecord, Arc<dyn GatewayAdapter>), RouteError> {
    let record = state
        .gateway_store()
        .get_gateway(gateway_id)
        .await
        .map_err(map_store_error)?;
    let adapter = state.adapter_for(&record).map_err(map_adapter_error)?;
    Ok((record, adapter))
}

/// Delivery is best effort; an offline gateway resyncs when it reconnects.
async fn announce_config_change(
    state: &AppState,
    gateway_id: &str,
    config_type: &str,
    action: &str,
) {
    let event = GatewayConfigEvent {
        config_type: config_type.to_string(),
        action: action.to_string(),
    };
    if let Err(e) = state
        .events()
        .broadcast_config_updated(gateway_id, &event, None)
        .await
    {
        warn!(
            "Failed to broadcast config change gateway_id={} error={}",
            gateway_id, e
        );
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/gateways", get(list_gateways).post(create_gateway))
        .route("/api/v1/gateways/{id}", delete(delete_gateway))
        .route("/api/v1/gateways/{id}/rotate-key", post(rotate_api_key))
        .route("/api/v1/gateways/{id}/credentials", put(update_credentials))
        .route("/api/v1/gateways/{id}/adapter-config", put(update_adapter_config))
        .route("/api/v1/gateways/{id}/health", get(gateway_health))
        .route(
            "/api/v1/gateways/{id}/providers",
            get(list_providers).post(deploy_provider),
        )
        .route(
            "/api/v1/gateways/{id}/providers/{provider_id}",
            get(get_provider).put(update_provider).delete(undeploy_provider),
        )
        .route("/api/v1/gateways/{id}/policies", get(list_policies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::gateway::transport::testing::FakeTransport;
    use acp_core::crypto::{decrypt_credentials, generate_encryption_key};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn setup() -> (TempDir, AppState) {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let state = AppState::new(config, generate_encryption_key())
            .await
            .unwrap();
        (temp_dir, state)
    }

    async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router()
            .with_state(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_mock_gateway(state: &AppState, adapter_config: Value) -> String {
        let (status, body) = send(
            state,
            "POST",
            "/api/v1/gateways",
            Some(json!({
                "name": "edge-1",
                "adapterType": "mock",
                "adapterConfig": adapter_config,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["gateway"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_gateway_seals_credentials() {
        let (_temp_dir, state) = setup().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/gateways",
            Some(json!({
                "name": "edge-1",
                "adapterConfig": {"controlPlaneUrl": "http://gw.local:9000"},
                "credentials": {"username": "admin", "password": "secret"},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["apiKey"].as_str().unwrap().starts_with("gw_"));
        assert_eq!(body["gateway"]["adapterType"], "on-premise");
        assert_eq!(body["gateway"]["hasCredentials"], true);

        let id = body["gateway"]["id"].as_str().unwrap();
        let record = state.gateway_store().get_gateway(id).await.unwrap();
        let blob = record.encrypted_credentials.unwrap();
        let credentials = decrypt_credentials(&blob, state.encryption_key()).unwrap();
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password, "secret");
    }

    #[tokio::test]
    async fn unsupported_adapter_type_is_rejected() {
        let (_temp_dir, state) = setup().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/gateways",
            Some(json!({"name": "edge-1", "adapterType": "cloud"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported adapter type: cloud");
        assert!(state.gateway_store().list_gateways().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_gateway_is_404() {
        let (_temp_dir, state) = setup().await;
        let uri = format!("/api/v1/gateways/{}/providers", uuid::Uuid::new_v4());
        let (status, _) = send(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&state, "GET", "/api/v1/gateways/not-a-uuid/policies", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deploy_broadcasts_config_updated() {
        let (_temp_dir, state) = setup().await;
        let gateway_id = create_mock_gateway(&state, json!({})).await;

        let (transport, wire) = FakeTransport::new();
        state
            .manager()
            .register(&gateway_id, transport.boxed(), "key")
            .await
            .unwrap();

        let uri = format!("/api/v1/gateways/{}/providers", gateway_id);
        let (status, body) = send(
            &state,
            "POST",
            &uri,
            Some(json!({"handle": "openai", "configuration": {"model": "gpt"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["deploymentId"], "mock-openai");

        let frames = wire.sent_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "config.updated");
        assert_eq!(frames[0]["payload"]["configType"], "llm-provider");
        assert_eq!(frames[0]["payload"]["action"], "deployed");
    }

    #[tokio::test]
    async fn failing_adapter_does_not_broadcast() {
        let (_temp_dir, state) = setup().await;
        let gateway_id = create_mock_gateway(&state, json!({"shouldFail": true})).await;

        let (transport, wire) = FakeTransport::new();
        state
            .manager()
            .register(&gateway_id, transport.boxed(), "key")
            .await
            .unwrap();

        let uri = format!("/api/v1/gateways/{}/providers", gateway_id);
        let (status, _) = send(&state, "POST", &uri, Some(json!({"handle": "openai"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(wire.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn health_requires_control_plane_url() {
        let (_temp_dir, state) = setup().await;
        let without_url = create_mock_gateway(&state, json!({})).await;
        let (status, _) = send(
            &state,
            "GET",
            &format!("/api/v1/gateways/{}/health", without_url),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let with_url =
            create_mock_gateway(&state, json!({"controlPlaneUrl": "http://gw.local"})).await;
        let (status, body) = send(
            &state,
            "GET",
            &format!("/api/v1/gateways/{}/health", with_url),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ACTIVE");
    }

    #[tokio::test]
    async fn delete_gateway_closes_live_connections() {
        let (_temp_dir, state) = setup().await;
        let gateway_id = create_mock_gateway(&state, json!({})).await;

        let (transport, wire) = FakeTransport::new();
        let connection = state
            .manager()
            .register(&gateway_id, transport.boxed(), "key")
            .await
            .unwrap();

        let (status, _) = send(
            &state,
            "DELETE",
            &format!("/api/v1/gateways/{}", gateway_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(connection.is_closed().await);
        assert_eq!(wire.close_codes.lock().unwrap().as_slice(), &[1000]);
        assert!(state.gateway_store().list_gateways().await.is_empty());
    }

    #[tokio::test]
    async fn rotate_key_invalidates_previous_key() {
        let (_temp_dir, state) = setup().await;
        let issued = state
            .gateway_store()
            .create_gateway(NewGateway::new("edge-1"))
            .await
            .unwrap();

        let gateway_id = issued.gateway.id.to_string();
        let (transport, wire) = FakeTransport::new();
        let connection = state
            .manager()
            .register(&gateway_id, transport.boxed(), &issued.api_key)
            .await
            .unwrap();

        let (status, body) = send(
            &state,
            "POST",
            &format!("/api/v1/gateways/{}/rotate-key", gateway_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let new_key = body["apiKey"].as_str().unwrap();
        assert_ne!(new_key, issued.api_key);

        assert!(state.gateway_store().verify_api_key(&issued.api_key).await.is_err());
        assert!(state.gateway_store().verify_api_key(new_key).await.is_ok());

        // the connection that used the old key is dropped
        assert!(connection.is_closed().await);
        assert!(state.manager().connections(&gateway_id).is_empty());
        assert_eq!(wire.close_codes.lock().unwrap().as_slice(), &[1000]);
    }

    #[tokio::test]
    async fn provider_lifecycle_on_mock_gateway() {
        let (_temp_dir, state) = setup().await;
        let gateway_id = create_mock_gateway(&state, json!({})).await;
        let providers = format!("/api/v1/gateways/{}/providers", gateway_id);
        let provider = format!("{}/mock-openai", providers);

        let (status, _) = send(
            &state,
            "POST",
            &providers,
            Some(json!({"handle": "openai", "displayName": "OpenAI"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&state, "GET", &provider, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "mock-openai");
        assert_eq!(body["name"], "OpenAI");

        let (status, body) = send(&state, "GET", &providers, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(
            &state,
            "PUT",
            &provider,
            Some(json!({"handle": "openai", "displayName": "OpenAI v2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deploymentId"], "mock-openai");

        let (status, _) = send(&state, "DELETE", &provider, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&state, "GET", &provider, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn adapter_config_change_rebuilds_adapter() {
        let (_temp_dir, state) = setup().await;
        let gateway_id = create_mock_gateway(&state, json!({})).await;
        let providers = format!("/api/v1/gateways/{}/providers", gateway_id);

        let (status, _) = send(&state, "POST", &providers, Some(json!({"handle": "openai"}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            &state,
            "PUT",
            &format!("/api/v1/gateways/{}/adapter-config", gateway_id),
            Some(json!({"adapterConfig": {"shouldFail": true}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&state, "GET", &providers, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("mock adapter failure"));
    }
}
