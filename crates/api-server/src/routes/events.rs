//! Event publishing endpoints

use acp_core::gateway::GatewayRepository;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{api_error, map_event_error, map_store_error, RouteError};
use crate::gateway::{
    AgentDeployedEvent, AgentUndeployedEvent, BroadcastOutcome, GatewayConfigEvent,
    GatewayEventType,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEventRequest {
    #[serde(rename = "type")]
    pub event_type: GatewayEventType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A request payload checked against the schema of its event type
#[derive(Serialize)]
#[serde(untagged)]
enum TypedEvent {
    AgentDeployed(AgentDeployedEvent),
    AgentUndeployed(AgentUndeployedEvent),
    ConfigUpdated(GatewayConfigEvent),
}

impl TypedEvent {
    fn decode(event_type: GatewayEventType, payload: Value) -> Result<Self, RouteError> {
        let decoded = match event_type {
            GatewayEventType::AgentDeployed => {
                serde_json::from_value(payload).map(TypedEvent::AgentDeployed)
            }
            GatewayEventType::AgentUndeployed => {
                serde_json::from_value(payload).map(TypedEvent::AgentUndeployed)
            }
            GatewayEventType::ConfigUpdated => {
                serde_json::from_value(payload).map(TypedEvent::ConfigUpdated)
            }
        };
        decoded.map_err(|err| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("invalid {} payload: {}", event_type, err),
            )
        })
    }

    fn event_type(&self) -> GatewayEventType {
        match self {
            TypedEvent::AgentDeployed(_) => GatewayEventType::AgentDeployed,
            TypedEvent::AgentUndeployed(_) => GatewayEventType::AgentUndeployed,
            TypedEvent::ConfigUpdated(_) => GatewayEventType::ConfigUpdated,
        }
    }
}

async fn publish_to_gateway(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    Json(req): Json<PublishEventRequest>,
) -> Result<(StatusCode, Json<BroadcastOutcome>), RouteError> {
    let event = TypedEvent::decode(req.event_type, req.payload)?;

    // unknown gateways are a caller error; offline ones are not
    let record = state
        .gateway_store()
        .get_gateway(&gateway_id)
        .await
        .map_err(map_store_error)?;
    let gateway_id = record.id.to_string();
    let user_id = req.user_id.as_deref();

    let events = state.events();
    let outcome = match &event {
        TypedEvent::AgentDeployed(event) => {
            events
                .broadcast_agent_deployed(&gateway_id, event, user_id)
                .await
        }
        TypedEvent::AgentUndeployed(event) => {
            events
                .broadcast_agent_undeployed(&gateway_id, event, user_id)
                .await
        }
        TypedEvent::ConfigUpdated(event) => {
            events
                .broadcast_config_updated(&gateway_id, event, user_id)
                .await
        }
    }
    .map_err(map_event_error)?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

async fn publish_to_all(
    State(state): State<AppState>,
    Json(req): Json<PublishEventRequest>,
) -> Result<(StatusCode, Json<BroadcastOutcome>), RouteError> {
    let event = TypedEvent::decode(req.event_type, req.payload)?;
    let user_id = req.user_id.as_deref();

    let outcome = state
        .events()
        .broadcast_to_all_gateways(event.event_type(), &event, user_id)
        .await
        .map_err(map_event_error)?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/gateways/events", post(publish_to_all))
        .route("/api/v1/gateways/{id}/events", post(publish_to_gateway))
}
