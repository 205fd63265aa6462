//! HTTP surface
//!
//! Two routes only: the acknowledgment intake and a liveness probe. The
//! push stream itself is TCP (see `transport`); everything else the POS
//! does over HTTP belongs to external collaborators.

mod ack;
mod health;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::server::ServerState;

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/ack", post(ack::acknowledge))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
