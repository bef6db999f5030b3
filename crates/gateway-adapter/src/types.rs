//! Value objects exchanged between the control plane and an adapter
//!
//! These types are the whole vocabulary of an adapter and must stay the same
//! across backends.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Adapter selection and its parameters, read once by a constructor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    #[serde(rename = "type")]
    pub adapter_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl AdapterConfig {
    pub fn new(adapter_type: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            parameters: Map::new(),
        }
    }

    /// Set one parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn bool_param(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn u64_param(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }
}

/// Provider configuration to deploy on a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDeploymentConfig {
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Provider definition in the remote gateway's own format
    #[serde(default)]
    pub configuration: Value,
}

/// Outcome of a deploy or update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDeploymentResult {
    pub deployment_id: String,
    pub status: String,
    pub deployed_at: DateTime<Utc>,
}

/// Provider state as reported by a gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Map<String, Value>>,
}

/// Reachability verdict for a gateway endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Active,
    Error,
}

/// Result of a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(rename = "responseTimeMs", with = "duration_millis")]
    pub response_time: Duration,
    pub checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HealthStatus {
    pub fn active(response_time: Duration) -> Self {
        Self {
            status: HealthState::Active,
            response_time,
            checked_at: Utc::now(),
            error_message: None,
        }
    }

    pub fn error(response_time: Duration, message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Error,
            response_time,
            checked_at: Utc::now(),
            error_message: Some(message.into()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HealthState::Active
    }
}

/// Policy available on a gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
