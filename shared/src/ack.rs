//! Acknowledgment types
//!
//! At-least-once delivery: acknowledgment-required events are tracked by the
//! hub until every targeted subscriber has acked (or dropped). Clients send
//! `Received` immediately on delivery, optionally followed by `Processed` or
//! `Failed` once the event has been applied.

use serde::{Deserialize, Serialize};

/// Acknowledgment status reported by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Received,
    Processed,
    Failed,
}

/// One acknowledgment, in-stream or via `POST /api/ack`
///
/// Idempotent: re-acking an already-acked event is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub event_id: u64,
    pub client_id: String,
    pub status: AckStatus,
    /// Unix milliseconds, client clock
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckRequest {
    /// Build a `Received` ack for an event
    pub fn received(event_id: u64, client_id: impl Into<String>) -> Self {
        Self {
            event_id,
            client_id: client_id.into(),
            status: AckStatus::Received,
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: None,
        }
    }

    /// Build a `Processed` ack for an event
    pub fn processed(event_id: u64, client_id: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Processed,
            ..Self::received(event_id, client_id)
        }
    }

    /// Build a `Failed` ack with the failure reason
    pub fn failed(event_id: u64, client_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Failed,
            error: Some(error.into()),
            ..Self::received(event_id, client_id)
        }
    }
}
