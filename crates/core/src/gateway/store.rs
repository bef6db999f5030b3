//! File-based gateway storage
//!
//! Keeps gateway records in memory and persists them as JSON under
//! `<base_dir>/state.json`. API keys are only ever stored as SHA-256 hashes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::model::{
    GatewayRecord, GatewaySummary, IssuedGatewayKey, NewGateway, DEFAULT_ADAPTER_TYPE,
};
use super::repository::GatewayRepository;
use crate::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredGatewayState {
    gateways: Vec<GatewayRecord>,
}

/// File-based gateway store using JSON
#[derive(Clone)]
pub struct FileGatewayStore {
    state: Arc<RwLock<HashMap<Uuid, GatewayRecord>>>,
    file_path: PathBuf,
}

impl FileGatewayStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;

        let file_path = base_dir.join("state.json");
        let gateways = load_state(&file_path).await?;
        debug!(
            "Loaded {} gateway(s) from {}",
            gateways.len(),
            file_path.display()
        );

        Ok(Self {
            state: Arc::new(RwLock::new(gateways)),
            file_path,
        })
    }

    /// Create a gateway and issue its API key
    pub async fn create_gateway(&self, new: NewGateway) -> Result<IssuedGatewayKey> {
        let name = normalize_name(&new.name)?;
        let adapter_type = new
            .adapter_type
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ADAPTER_TYPE.to_string());

        let api_key = generate_api_key();
        let now = Utc::now();
        let record = GatewayRecord {
            id: Uuid::new_v4(),
            name,
            adapter_type,
            adapter_config: new.adapter_config,
            encrypted_credentials: new.encrypted_credentials,
            api_key_hash: hash_api_key(&api_key),
            is_active: false,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        state.insert(record.id, record.clone());
        persist_state(&self.file_path, &state).await?;

        Ok(IssuedGatewayKey {
            gateway: record.to_summary(),
            api_key,
        })
    }

    pub async fn list_gateways(&self) -> Vec<GatewaySummary> {
        let state = self.state.read().await;
        let mut gateways = state
            .values()
            .map(GatewayRecord::to_summary)
            .collect::<Vec<_>>();
        gateways.sort_by(|left, right| left.name.cmp(&right.name));
        gateways
    }

    /// Replace the adapter config of a gateway
    pub async fn update_adapter_config(
        &self,
        gateway_id: &str,
        adapter_config: Map<String, Value>,
    ) -> Result<GatewaySummary> {
        self.mutate(gateway_id, |record| record.adapter_config = adapter_config)
            .await
    }

    /// Replace the encrypted credential blob of a gateway
    pub async fn set_credentials(
        &self,
        gateway_id: &str,
        encrypted_credentials: Vec<u8>,
    ) -> Result<GatewaySummary> {
        self.mutate(gateway_id, |record| {
            record.encrypted_credentials = Some(encrypted_credentials)
        })
        .await
    }

    pub async fn set_active(&self, gateway_id: &str, is_active: bool) -> Result<GatewaySummary> {
        self.mutate(gateway_id, |record| record.is_active = is_active)
            .await
    }

    /// Issue a new API key, invalidating the previous one
    pub async fn rotate_api_key(&self, gateway_id: &str) -> Result<IssuedGatewayKey> {
        let api_key = generate_api_key();
        let hash = hash_api_key(&api_key);
        let gateway = self
            .mutate(gateway_id, |record| record.api_key_hash = hash)
            .await?;
        Ok(IssuedGatewayKey { gateway, api_key })
    }

    pub async fn delete_gateway(&self, gateway_id: &str) -> Result<()> {
        let id = parse_gateway_id(gateway_id)?;
        let mut state = self.state.write().await;
        if state.remove(&id).is_none() {
            return Err(Error::GatewayNotFound(gateway_id.to_string()));
        }
        persist_state(&self.file_path, &state).await
    }

    /// Resolve the gateway owning an API key
    pub async fn verify_api_key(&self, api_key: &str) -> Result<GatewaySummary> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(Error::InvalidInput("api key cannot be empty".to_string()));
        }

        let hash = hash_api_key(api_key);
        let state = self.state.read().await;
        state
            .values()
            .find(|record| record.api_key_hash == hash)
            .map(GatewayRecord::to_summary)
            .ok_or_else(|| Error::GatewayNotFound("no gateway matches api key".to_string()))
    }

    async fn mutate<F>(&self, gateway_id: &str, apply: F) -> Result<GatewaySummary>
    where
        F: FnOnce(&mut GatewayRecord),
    {
        let id = parse_gateway_id(gateway_id)?;
        let mut state = self.state.write().await;
        let record = state
            .get_mut(&id)
            .ok_or_else(|| Error::GatewayNotFound(gateway_id.to_string()))?;

        apply(record);
        record.updated_at = Utc::now();
        let summary = record.to_summary();

        persist_state(&self.file_path, &state).await?;
        Ok(summary)
    }
}

#[async_trait]
impl GatewayRepository for FileGatewayStore {
    async fn get_gateway(&self, gateway_id: &str) -> Result<GatewayRecord> {
        let id = parse_gateway_id(gateway_id)?;
        let state = self.state.read().await;
        state
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::GatewayNotFound(gateway_id.to_string()))
    }
}

fn parse_gateway_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|err| Error::InvalidInput(format!("invalid gateway ID '{}': {}", value, err)))
}

fn normalize_name(value: &str) -> Result<String> {
    let normalized = value.trim().to_string();
    if normalized.is_empty() {
        return Err(Error::InvalidInput(
            "gateway name cannot be empty".to_string(),
        ));
    }
    if normalized.len() > 128 {
        return Err(Error::InvalidInput("gateway name is too long".to_string()));
    }
    Ok(normalized)
}

fn generate_api_key() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("gw_{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

async fn load_state(path: &Path) -> Result<HashMap<Uuid, GatewayRecord>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let stored: StoredGatewayState = serde_json::from_str(&content)?;
    Ok(stored
        .gateways
        .into_iter()
        .map(|record| (record.id, record))
        .collect())
}

async fn persist_state(path: &Path, state: &HashMap<Uuid, GatewayRecord>) -> Result<()> {
    let stored = StoredGatewayState {
        gateways: state.values().cloned().collect(),
    };
    let content = serde_json::to_string_pretty(&stored)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(path, content)
        .await
        .map_err(|err| Error::Storage(format!("Failed to write gateway state: {}", err)))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::gateway::CONTROL_PLANE_URL_KEY;

    async fn build_store() -> (FileGatewayStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileGatewayStore::new(temp_dir.path().join("gateways"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn create_and_verify_api_key() {
        let (store, _temp_dir) = build_store().await;
        let issued = store
            .create_gateway(NewGateway::new("edge-east"))
            .await
            .unwrap();

        assert!(issued.api_key.starts_with("gw_"));
        assert_eq!(issued.gateway.adapter_type, DEFAULT_ADAPTER_TYPE);

        let verified = store.verify_api_key(&issued.api_key).await.unwrap();
        assert_eq!(verified.id, issued.gateway.id);

        let err = store.verify_api_key("gw_unknown").await.unwrap_err();
        assert!(matches!(err, Error::GatewayNotFound(_)));
    }

    #[tokio::test]
    async fn rotating_key_invalidates_previous_one() {
        let (store, _temp_dir) = build_store().await;
        let issued = store
            .create_gateway(NewGateway::new("edge-west"))
            .await
            .unwrap();
        let id = issued.gateway.id.to_string();

        let rotated = store.rotate_api_key(&id).await.unwrap();
        assert_ne!(rotated.api_key, issued.api_key);
        assert!(store.verify_api_key(&issued.api_key).await.is_err());
        assert!(store.verify_api_key(&rotated.api_key).await.is_ok());
    }

    #[tokio::test]
    async fn records_survive_reload() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("gateways");

        let id = {
            let store = FileGatewayStore::new(&dir).await.unwrap();
            let issued = store
                .create_gateway(
                    NewGateway::new("edge-persist")
                        .with_config(CONTROL_PLANE_URL_KEY, "http://10.0.0.5:9090")
                        .with_encrypted_credentials(vec![9, 9, 9]),
                )
                .await
                .unwrap();
            store
                .set_active(&issued.gateway.id.to_string(), true)
                .await
                .unwrap();
            issued.gateway.id.to_string()
        };

        let store = FileGatewayStore::new(&dir).await.unwrap();
        let record = store.get_gateway(&id).await.unwrap();
        assert_eq!(record.name, "edge-persist");
        assert!(record.is_active);
        assert_eq!(record.encrypted_credentials, Some(vec![9, 9, 9]));
        assert_eq!(record.control_plane_url(), Some("http://10.0.0.5:9090"));
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids() {
        let (store, _temp_dir) = build_store().await;

        let missing = store
            .get_gateway(&Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::GatewayNotFound(_)));

        let malformed = store.get_gateway("not-a-uuid").await.unwrap_err();
        assert!(matches!(malformed, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_removes_gateway() {
        let (store, _temp_dir) = build_store().await;
        let issued = store
            .create_gateway(NewGateway::new("edge-temp"))
            .await
            .unwrap();
        let id = issued.gateway.id.to_string();

        store.delete_gateway(&id).await.unwrap();
        assert!(store.list_gateways().await.is_empty());
        assert!(matches!(
            store.delete_gateway(&id).await,
            Err(Error::GatewayNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_blank_names() {
        let (store, _temp_dir) = build_store().await;
        let err = store
            .create_gateway(NewGateway::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
