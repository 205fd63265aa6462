//! Acknowledgment intake
//!
//! Same semantics as the in-stream `Ack` frame, for clients that lost the
//! stream but still want to settle what they processed. Idempotent.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use shared::ack::AckRequest;

use crate::server::ServerState;

pub async fn acknowledge(
    State(state): State<ServerState>,
    Json(req): Json<AckRequest>,
) -> Json<Value> {
    state.hub().handle_ack(&req);
    Json(json!({ "code": 0 }))
}
