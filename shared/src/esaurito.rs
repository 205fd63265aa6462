//! Out-of-stock (esaurito) order domain types
//!
//! When a product is flagged unavailable mid-fulfillment, every open order
//! carrying it gets an [`OutOfStockOrder`] record. The record moves one way:
//!
//! ```text
//! ATTIVO ──▶ IN_GESTIONE ──▶ RISOLTO   (split: new order without the
//!    │                                  unavailable lines)
//!    └──────────────────────▶ ANNULLATO (cancel: inventory restored)
//! ```
//!
//! Terminal states accept retried transitions as no-op successes; delivery
//! of the triggering events is at-least-once.

use serde::{Deserialize, Serialize};

/// Out-of-stock record state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutOfStockState {
    /// Open, waiting for an operator
    #[default]
    Attivo,
    /// Claimed by one operator
    InGestione,
    /// Resolved by splitting the order (terminal)
    Risolto,
    /// Resolved by cancelling the order (terminal)
    Annullato,
}

impl OutOfStockState {
    /// Terminal states permit no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutOfStockState::Risolto | OutOfStockState::Annullato)
    }
}

/// One affected order line, with the quantity reserved at flag time
///
/// `quantity_reserved` is what inventory restoration uses on cancel. It is
/// captured when the record is created and never recomputed from current
/// order state, so retried cancels cannot double-count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedItem {
    pub product_id: String,
    pub name: String,
    pub quantity_reserved: i32,
}

/// An out-of-stock record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfStockOrder {
    pub original_order_id: String,
    pub original_order_number: String,
    pub table_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_order_id: Option<String>,
    pub affected_items: Vec<AffectedItem>,
    #[serde(default)]
    pub state: OutOfStockState,
    /// Operator currently handling the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled_by: Option<String>,
    /// Operator who drove the record to a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// Unix milliseconds
    pub created_at: i64,
    pub updated_at: i64,
}

impl OutOfStockOrder {
    pub fn new(
        original_order_id: impl Into<String>,
        original_order_number: impl Into<String>,
        table_number: impl Into<String>,
        affected_items: Vec<AffectedItem>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            original_order_id: original_order_id.into(),
            original_order_number: original_order_number.into(),
            table_number: table_number.into(),
            split_order_id: None,
            affected_items,
            state: OutOfStockState::Attivo,
            handled_by: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ==================== Domain event payloads ====================

/// Payload of `order:esaurito:resolved`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsauritoResolvedPayload {
    pub original_order_id: String,
    pub original_order_number: String,
    pub new_order_id: String,
    pub new_order_number: String,
    pub table_number: String,
    pub resolved_by: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Payload of `order:esaurito:cancelled`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsauritoCancelledPayload {
    pub order_id: String,
    pub order_number: String,
    pub table_number: String,
    pub cancelled_by: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&OutOfStockState::Attivo).unwrap(),
            "\"ATTIVO\""
        );
        assert_eq!(
            serde_json::to_string(&OutOfStockState::InGestione).unwrap(),
            "\"IN_GESTIONE\""
        );
        assert_eq!(
            serde_json::to_string(&OutOfStockState::Risolto).unwrap(),
            "\"RISOLTO\""
        );
        assert_eq!(
            serde_json::to_string(&OutOfStockState::Annullato).unwrap(),
            "\"ANNULLATO\""
        );
    }

    #[test]
    fn test_terminal_predicate() {
        assert!(!OutOfStockState::Attivo.is_terminal());
        assert!(!OutOfStockState::InGestione.is_terminal());
        assert!(OutOfStockState::Risolto.is_terminal());
        assert!(OutOfStockState::Annullato.is_terminal());
    }
}
