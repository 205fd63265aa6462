//! Canonical event model for the distribution hub
//!
//! Every notification that travels from the hub to a station client is an
//! [`Event`]. Events are created by business operations, get their id
//! assigned by the hub (monotonic per hub instance; the id doubles as the
//! replay cursor), and are serialized in the camelCase wire shape.
//!
//! A legacy shorter wire shape (no priority/version) still arrives from
//! older emitters; [`IncomingEvent`] is the tagged union that upgrades it at
//! the boundary so internal logic only ever sees the canonical shape.

use crate::station::{Role, Station};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event kinds
///
/// Kinds are colon-namespaced strings on the wire; these constants cover the
/// kinds the core emits or consumes itself. Business operations are free to
/// emit others.
pub mod kinds {
    /// A new order was created
    pub const ORDER_CREATED: &str = "order:created";
    /// An order line changed status (preparing, ready, served)
    pub const ORDER_ITEM_STATUS: &str = "order:item:status";
    /// A product's availability flipped
    pub const PRODUCT_AVAILABILITY: &str = "product:availability";
    /// A payment completed
    pub const PAYMENT_COMPLETED: &str = "payment:completed";
    /// An out-of-stock record was opened for an order
    pub const ORDER_ESAURITO_CREATED: &str = "order:esaurito:created";
    /// An out-of-stock record was resolved by splitting the order
    pub const ORDER_ESAURITO_RESOLVED: &str = "order:esaurito:resolved";
    /// An out-of-stock record was resolved by cancelling the order
    pub const ORDER_ESAURITO_CANCELLED: &str = "order:esaurito:cancelled";
}

/// Delivery priority
///
/// Low-priority events may be rate-limited; high/urgent unacknowledged
/// events are redelivered on heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Operation carried by an [`EntityChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityOperation {
    Create,
    Update,
    Delete,
}

/// A versioned change to one entity, attached to an event
///
/// The version pair is what the client-side optimistic update ledger and
/// station cache reconcile against: `version` confirms a pending local
/// mutation, a strictly newer `previous_version` rolls it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    pub entity_type: String,
    pub entity_id: String,
    pub operation: EntityOperation,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<u64>,
}

/// Canonical event wire shape
///
/// `id` is 0 until the hub assigns it on emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: EventPriority,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_changes: Option<Vec<EntityChange>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_roles: Vec<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_stations: Option<Vec<Station>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub acknowledgment_required: bool,
    pub version: u64,
    /// Unix milliseconds, server clock
    pub timestamp: i64,
}

impl Event {
    /// Create a new unassigned event (id 0, assigned by the hub on emit)
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        Self {
            id: 0,
            kind: kind.into(),
            priority: EventPriority::Normal,
            payload,
            entity_changes: None,
            target_roles: Vec::new(),
            target_stations: None,
            acknowledgment_required: false,
            version: timestamp as u64,
            timestamp,
        }
    }

    /// Set the delivery priority
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Restrict delivery to the given roles
    pub fn with_target_roles(mut self, roles: Vec<Role>) -> Self {
        self.target_roles = roles;
        self
    }

    /// Restrict delivery to the given stations
    pub fn with_target_stations(mut self, stations: Vec<Station>) -> Self {
        self.target_stations = Some(stations);
        self
    }

    /// Attach entity changes
    pub fn with_entity_changes(mut self, changes: Vec<EntityChange>) -> Self {
        self.entity_changes = Some(changes);
        self
    }

    /// Require acknowledgment from every receiver
    pub fn require_ack(mut self) -> Self {
        self.acknowledgment_required = true;
        self
    }

    /// First entity id carried by this event, if any (rate-limit dedup key)
    pub fn first_entity_id(&self) -> Option<&str> {
        self.entity_changes
            .as_deref()
            .and_then(|c| c.first())
            .map(|c| c.entity_id.as_str())
    }
}

/// Legacy shorter wire shape still produced by older emitters
///
/// No priority, no version, no targeting. Upgraded at the boundary via
/// [`IncomingEvent::normalize`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEvent {
    #[serde(default)]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Tagged union over the two accepted wire shapes
///
/// Deserialization tries the canonical shape first; anything that only fits
/// the legacy shape is upgraded once, here, and nowhere else.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncomingEvent {
    Canonical(Event),
    Legacy(LegacyEvent),
}

impl IncomingEvent {
    /// Normalize to the canonical shape
    pub fn normalize(self) -> Event {
        match self {
            IncomingEvent::Canonical(event) => event,
            IncomingEvent::Legacy(legacy) => {
                let timestamp = legacy
                    .timestamp
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                Event {
                    id: legacy.id,
                    kind: legacy.kind,
                    priority: EventPriority::Normal,
                    payload: legacy.payload,
                    entity_changes: None,
                    target_roles: Vec::new(),
                    target_stations: None,
                    acknowledgment_required: false,
                    version: timestamp as u64,
                    timestamp,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_roundtrip() {
        let event = Event::new(kinds::ORDER_CREATED, json!({"orderId": "o1"}))
            .with_priority(EventPriority::High)
            .require_ack();

        let raw = serde_json::to_string(&event).unwrap();
        assert!(raw.contains("\"type\":\"order:created\""));
        assert!(raw.contains("\"priority\":\"high\""));

        let back: IncomingEvent = serde_json::from_str(&raw).unwrap();
        let back = back.normalize();
        assert_eq!(back.kind, kinds::ORDER_CREATED);
        assert_eq!(back.priority, EventPriority::High);
        assert!(back.acknowledgment_required);
    }

    #[test]
    fn test_legacy_shape_upgraded() {
        let raw = r#"{"type":"order:created","payload":{"orderId":"o1"},"timestamp":1700000000000}"#;
        let incoming: IncomingEvent = serde_json::from_str(raw).unwrap();
        let event = incoming.normalize();

        assert_eq!(event.kind, "order:created");
        assert_eq!(event.priority, EventPriority::Normal);
        assert_eq!(event.version, 1700000000000);
        assert!(!event.acknowledgment_required);
        assert!(event.target_roles.is_empty());
    }

    #[test]
    fn test_first_entity_id() {
        let mut event = Event::new(kinds::PRODUCT_AVAILABILITY, json!({}));
        assert_eq!(event.first_entity_id(), None);

        event = event.with_entity_changes(vec![EntityChange {
            entity_type: "product".into(),
            entity_id: "p42".into(),
            operation: EntityOperation::Update,
            version: 7,
            previous_version: Some(6),
        }]);
        assert_eq!(event.first_entity_id(), Some("p42"));
    }
}
