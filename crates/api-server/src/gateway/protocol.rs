//! Wire types pushed to connected gateways

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// WebSocket close code for a normal shutdown of one connection
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code used when the server stops
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code asking the peer to retry later
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// RFC3339 timestamp in UTC with second precision
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Event types pushed to gateways
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayEventType {
    #[serde(rename = "agent.deployed")]
    AgentDeployed,
    #[serde(rename = "agent.undeployed")]
    AgentUndeployed,
    #[serde(rename = "config.updated")]
    ConfigUpdated,
}

impl GatewayEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayEventType::AgentDeployed => "agent.deployed",
            GatewayEventType::AgentUndeployed => "agent.undeployed",
            GatewayEventType::ConfigUpdated => "config.updated",
        }
    }
}

impl std::fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper around every pushed event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: GatewayEventType,
    pub payload: serde_json::Value,
    pub timestamp: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Payload of `agent.deployed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDeployedEvent {
    pub agent_id: String,
    pub deployment_id: String,
    pub environment: String,
}

/// Payload of `agent.undeployed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUndeployedEvent {
    pub agent_id: String,
    pub environment: String,
}

/// Payload of `config.updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfigEvent {
    pub config_type: String,
    pub action: String,
}

/// Control frames sent outside the event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "connection.ack")]
    ConnectionAck {
        #[serde(rename = "gatewayId")]
        gateway_id: String,
        #[serde(rename = "connectionId")]
        connection_id: String,
        timestamp: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerFrame {
    pub fn ack(gateway_id: &str, connection_id: &str) -> Self {
        ServerFrame::ConnectionAck {
            gateway_id: gateway_id.to_string(),
            connection_id: connection_id.to_string(),
            timestamp: rfc3339_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_frame_serialization() {
        let json = serde_json::to_value(ServerFrame::ack("gw-1", "conn-1")).unwrap();
        assert_eq!(json["type"], "connection.ack");
        assert_eq!(json["gatewayId"], "gw-1");
        assert_eq!(json["connectionId"], "conn-1");
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn error_frame_serialization() {
        let frame = ServerFrame::Error {
            message: "connection limit reached".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","message":"connection limit reached"}"#
        );
    }

    #[test]
    fn envelope_omits_missing_user() {
        let envelope = EventEnvelope {
            event_type: GatewayEventType::ConfigUpdated,
            payload: serde_json::json!({ "configType": "llm-provider", "action": "deployed" }),
            timestamp: rfc3339_now(),
            correlation_id: "c-1".to_string(),
            user_id: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "config.updated");
        assert_eq!(json["correlationId"], "c-1");
        assert!(json.get("userId").is_none());
    }

    #[test]
    fn event_type_parses_dotted_names() {
        let parsed: GatewayEventType = serde_json::from_str(r#""agent.undeployed""#).unwrap();
        assert_eq!(parsed, GatewayEventType::AgentUndeployed);
        assert_eq!(parsed.to_string(), "agent.undeployed");
    }
}
