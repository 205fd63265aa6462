//! Liveness probe

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::server::ServerState;

pub async fn health(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "environment": state.config.environment,
        "uptimeSecs": state.uptime_secs(),
        "connectedClients": state.hub().connected_clients().len(),
        "lastEventId": state.hub().last_event_id(),
    }))
}
