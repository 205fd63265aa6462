//! Minimal order model mutated by the out-of-stock workflow
//!
//! Persistence lives behind the server's `OrderStore` trait; this is the
//! shape both sides agree on. Only the fields the workflow touches are here,
//! the full order lifecycle (payments, splitting for payment, receipts) is
//! an external collaborator.

use serde::{Deserialize, Serialize};

/// Order / order line state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    #[default]
    Attivo,
    Annullato,
}

/// One order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    pub quantity: i32,
    /// Whether the product is still fulfillable
    pub available: bool,
    #[serde(default)]
    pub state: OrderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// An order as the workflow sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub table_number: String,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub state: OrderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Unix milliseconds
    pub created_at: i64,
}

impl Order {
    /// Mark the order and every line ANNULLATO
    pub fn void(&mut self) {
        self.state = OrderState::Annullato;
        for line in &mut self.lines {
            line.state = OrderState::Annullato;
        }
    }

    /// Lines that are still fulfillable (available product, not voided)
    pub fn fulfillable_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines
            .iter()
            .filter(|l| l.available && l.state == OrderState::Attivo)
    }
}

// ==================== Management note annotations ====================

/// Prefix marking a management annotation inside an order note
///
/// The out-of-stock workflow appends `[ESAURITO] ...` lines while handling
/// an order. A split order starts from a note cleaned of every such line, so
/// repeated splits never compound annotations.
pub const MANAGEMENT_NOTE_TAG: &str = "[ESAURITO]";

/// Append a management annotation to a note
pub fn append_management_note(note: Option<&str>, annotation: &str) -> String {
    let line = format!("{} {}", MANAGEMENT_NOTE_TAG, annotation);
    match note {
        Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, line),
        _ => line,
    }
}

/// Strip every management annotation from a note
///
/// Returns `None` when nothing but annotations remains.
pub fn clean_management_note(note: Option<&str>) -> Option<String> {
    let note = note?;
    let cleaned: Vec<&str> = note
        .lines()
        .filter(|line| !line.trim_start().starts_with(MANAGEMENT_NOTE_TAG))
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n"))
    }
}
