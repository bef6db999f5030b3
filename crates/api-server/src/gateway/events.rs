//! Event broadcast to connected gateways
//!
//! Delivery is at-most-once. A gateway that is offline when an event is
//! published never receives it and is expected to resync on reconnect.
//! Per-connection send failures only show up in that connection's stats.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::manager::ConnectionManager;
use super::protocol::{
    rfc3339_now, AgentDeployedEvent, AgentUndeployedEvent, EventEnvelope, GatewayConfigEvent,
    GatewayEventType,
};

/// Largest accepted serialized payload
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What happened to one broadcast
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub correlation_id: String,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct GatewayEventsService {
    manager: ConnectionManager,
}

impl GatewayEventsService {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Push an event to every live connection of `gateway_id`
    pub async fn broadcast_event<P: Serialize + ?Sized>(
        &self,
        gateway_id: &str,
        event_type: GatewayEventType,
        payload: &P,
        user_id: Option<&str>,
    ) -> Result<BroadcastOutcome, EventError> {
        let (frame, correlation_id) = build_envelope(event_type, payload, user_id)?;
        Ok(self
            .deliver(gateway_id, event_type, &frame, correlation_id)
            .await)
    }

    /// Push an event to every gateway that currently has a connection
    pub async fn broadcast_to_all_gateways<P: Serialize + ?Sized>(
        &self,
        event_type: GatewayEventType,
        payload: &P,
        user_id: Option<&str>,
    ) -> Result<BroadcastOutcome, EventError> {
        let (frame, correlation_id) = build_envelope(event_type, payload, user_id)?;

        let mut total = BroadcastOutcome {
            correlation_id: correlation_id.clone(),
            ..BroadcastOutcome::default()
        };
        for gateway_id in self.manager.gateway_ids() {
            let outcome = self
                .deliver(&gateway_id, event_type, &frame, correlation_id.clone())
                .await;
            total.delivered += outcome.delivered;
            total.failed += outcome.failed;
        }

        info!(
            "Broadcast to all gateways event_type={} correlation_id={} delivered={} failed={}",
            event_type, total.correlation_id, total.delivered, total.failed
        );
        Ok(total)
    }

    pub async fn broadcast_agent_deployed(
        &self,
        gateway_id: &str,
        event: &AgentDeployedEvent,
        user_id: Option<&str>,
    ) -> Result<BroadcastOutcome, EventError> {
        self.broadcast_event(gateway_id, GatewayEventType::AgentDeployed, event, user_id)
            .await
    }

    pub async fn broadcast_agent_undeployed(
        &self,
        gateway_id: &str,
        event: &AgentUndeployedEvent,
        user_id: Option<&str>,
    ) -> Result<BroadcastOutcome, EventError> {
        self.broadcast_event(gateway_id, GatewayEventType::AgentUndeployed, event, user_id)
            .await
    }

    pub async fn broadcast_config_updated(
        &self,
        gateway_id: &str,
        event: &GatewayConfigEvent,
        user_id: Option<&str>,
    ) -> Result<BroadcastOutcome, EventError> {
        self.broadcast_event(gateway_id, GatewayEventType::ConfigUpdated, event, user_id)
            .await
    }

    async fn deliver(
        &self,
        gateway_id: &str,
        event_type: GatewayEventType,
        frame: &[u8],
        correlation_id: String,
    ) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome {
            correlation_id,
            ..BroadcastOutcome::default()
        };

        let connections = self.manager.connections(gateway_id);
        if connections.is_empty() {
            warn!(
                "No active connections for gateway gateway_id={} event_type={} correlation_id={}",
                gateway_id, event_type, outcome.correlation_id
            );
            return outcome;
        }

        for connection in connections {
            match connection.send(frame).await {
                Ok(()) => {
                    connection.stats().record_success();
                    outcome.delivered += 1;
                }
                Err(e) => {
                    connection.stats().record_failure(e.to_string());
                    outcome.failed += 1;
                    warn!(
                        "Event delivery failed gateway_id={} connection_id={} event_type={} error={}",
                        gateway_id,
                        connection.connection_id(),
                        event_type,
                        e
                    );
                }
            }
        }

        debug!(
            "Event broadcast gateway_id={} event_type={} correlation_id={} delivered={} failed={}",
            gateway_id, event_type, outcome.correlation_id, outcome.delivered, outcome.failed
        );
        outcome
    }
}

/// Serialize `payload`, enforce the size ceiling and encode the envelope once
fn build_envelope<P: Serialize + ?Sized>(
    event_type: GatewayEventType,
    payload: &P,
    user_id: Option<&str>,
) -> Result<(Vec<u8>, String), EventError> {
    let payload = serde_json::to_value(payload)?;
    let size = serde_json::to_vec(&payload)?.len();
    if size > MAX_PAYLOAD_SIZE {
        return Err(EventError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let envelope = EventEnvelope {
        event_type,
        payload,
        timestamp: rfc3339_now(),
        correlation_id: Uuid::new_v4().to_string(),
        user_id: user_id.map(str::to_string),
    };
    let frame = serde_json::to_vec(&envelope)?;
    Ok((frame, envelope.correlation_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::transport::testing::FakeTransport;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn setup() -> (ConnectionManager, GatewayEventsService) {
        let manager =
            ConnectionManager::new(100, Duration::from_secs(20), Duration::from_secs(30));
        let events = GatewayEventsService::new(manager.clone());
        (manager, events)
    }

    fn config_event() -> GatewayConfigEvent {
        GatewayConfigEvent {
            config_type: "llm-provider".to_string(),
            action: "deployed".to_string(),
        }
    }

    #[tokio::test]
    async fn offline_gateway_is_not_an_error() {
        let (_manager, events) = setup();
        let outcome = events
            .broadcast_config_updated("gw-1", &config_event(), None)
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_sending() {
        let (manager, events) = setup();
        let (transport, wire) = FakeTransport::new();
        manager
            .register("gw-1", transport.boxed(), "key")
            .await
            .unwrap();

        let payload = "x".repeat(MAX_PAYLOAD_SIZE + 1);
        let err = events
            .broadcast_event("gw-1", GatewayEventType::ConfigUpdated, &payload, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::PayloadTooLarge { .. }));

        let err = events
            .broadcast_to_all_gateways(GatewayEventType::ConfigUpdated, &payload, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::PayloadTooLarge { .. }));
        assert_eq!(wire.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_send_is_recorded_in_stats_only() {
        let (manager, events) = setup();
        let (transport, _wire) = FakeTransport::new();
        let connection = manager
            .register("gw-1", transport.failing_sends().boxed(), "key")
            .await
            .unwrap();

        let outcome = events
            .broadcast_config_updated("gw-1", &config_event(), None)
            .await
            .unwrap();
        assert_eq!(outcome.failed, 1);

        let stats = connection.stats().snapshot();
        assert_eq!(stats.total_sent, 0);
        assert_eq!(stats.failed_deliveries, 1);
        assert!(stats.last_failure_reason.is_some());
    }

    #[tokio::test]
    async fn envelope_reaches_every_connection() {
        let (manager, events) = setup();
        let (first, first_wire) = FakeTransport::new();
        let (second, second_wire) = FakeTransport::new();
        manager.register("gw-1", first.boxed(), "key").await.unwrap();
        manager
            .register("gw-1", second.boxed(), "key")
            .await
            .unwrap();

        let event = AgentDeployedEvent {
            agent_id: "agent-1".to_string(),
            deployment_id: "dep-1".to_string(),
            environment: "prod".to_string(),
        };
        let outcome = events
            .broadcast_agent_deployed("gw-1", &event, Some("user-7"))
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 2);

        for wire in [first_wire, second_wire] {
            let frames = wire.sent_frames();
            assert_eq!(frames.len(), 1);
            let frame = &frames[0];
            assert_eq!(frame["type"], "agent.deployed");
            assert_eq!(frame["payload"]["agentId"], "agent-1");
            assert_eq!(frame["correlationId"], outcome.correlation_id.as_str());
            assert_eq!(frame["userId"], "user-7");
            assert!(chrono::DateTime::parse_from_rfc3339(frame["timestamp"].as_str().unwrap()).is_ok());
        }
        assert_eq!(manager.stats().await.total_events_sent, 2);
    }

    #[tokio::test]
    async fn broadcast_to_all_shares_one_correlation_id() {
        let (manager, events) = setup();
        let (first, first_wire) = FakeTransport::new();
        let (second, second_wire) = FakeTransport::new();
        manager.register("gw-1", first.boxed(), "key").await.unwrap();
        manager
            .register("gw-2", second.boxed(), "key")
            .await
            .unwrap();

        let event = AgentUndeployedEvent {
            agent_id: "agent-1".to_string(),
            environment: "prod".to_string(),
        };
        let outcome = events
            .broadcast_to_all_gateways(GatewayEventType::AgentUndeployed, &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 2);

        let first = first_wire.sent_frames();
        let second = second_wire.sent_frames();
        assert_eq!(first[0]["correlationId"], second[0]["correlationId"]);
        assert!(first[0].get("userId").is_none());
    }
}
