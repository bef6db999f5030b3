//! Gateway model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Adapter used when a gateway does not name one
pub const DEFAULT_ADAPTER_TYPE: &str = "on-premise";

/// Adapter config key holding the remote gateway control API base URL
pub const CONTROL_PLANE_URL_KEY: &str = "controlPlaneUrl";

/// A gateway as stored by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRecord {
    pub id: Uuid,
    pub name: String,
    pub adapter_type: String,
    #[serde(default)]
    pub adapter_config: Map<String, Value>,
    #[serde(default, with = "base64_bytes")]
    pub encrypted_credentials: Option<Vec<u8>>,
    pub api_key_hash: String,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GatewayRecord {
    /// Read a string parameter from the adapter config
    pub fn adapter_config_str(&self, key: &str) -> Option<&str> {
        self.adapter_config.get(key).and_then(Value::as_str)
    }

    /// The remote control API base URL, if configured
    pub fn control_plane_url(&self) -> Option<&str> {
        self.adapter_config_str(CONTROL_PLANE_URL_KEY)
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn to_summary(&self) -> GatewaySummary {
        GatewaySummary {
            id: self.id,
            name: self.name.clone(),
            adapter_type: self.adapter_type.clone(),
            adapter_config: self.adapter_config.clone(),
            has_credentials: self
                .encrypted_credentials
                .as_ref()
                .is_some_and(|blob| !blob.is_empty()),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for creating a gateway
#[derive(Debug, Clone, Default)]
pub struct NewGateway {
    pub name: String,
    pub adapter_type: Option<String>,
    pub adapter_config: Map<String, Value>,
    pub encrypted_credentials: Option<Vec<u8>>,
}

impl NewGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the adapter type
    pub fn with_adapter_type(mut self, adapter_type: impl Into<String>) -> Self {
        self.adapter_type = Some(adapter_type.into());
        self
    }

    /// Set one adapter config parameter
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.adapter_config.insert(key.into(), value.into());
        self
    }

    /// Set the already encrypted credential blob
    pub fn with_encrypted_credentials(mut self, blob: Vec<u8>) -> Self {
        self.encrypted_credentials = Some(blob);
        self
    }
}

/// Gateway view safe to hand out over the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySummary {
    pub id: Uuid,
    pub name: String,
    pub adapter_type: String,
    pub adapter_config: Map<String, Value>,
    pub has_credentials: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned once when a gateway key is created or rotated
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedGatewayKey {
    pub gateway: GatewaySummary,
    pub api_key: String,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|raw| STANDARD.decode(raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
