//! Work stations, roles, and the station filter
//!
//! The filter is a pure predicate over (station, event kind, payload, user).
//! The hub evaluates it on fan-out; clients re-evaluate it on every
//! delivered event, replayed or live. Both sides call this same function,
//! so they agree by construction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A logical work area subscribing to a relevant subset of domain events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Station {
    Bar,
    Kitchen,
    Waiter,
    Cashier,
}

impl Station {
    /// Wire name, matches the `destination` field in routed payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Station::Bar => "bar",
            Station::Kitchen => "kitchen",
            Station::Waiter => "waiter",
            Station::Cashier => "cashier",
        }
    }

    /// All stations, for filter matrix tests
    pub const ALL: [Station; 4] = [
        Station::Bar,
        Station::Kitchen,
        Station::Waiter,
        Station::Cashier,
    ];
}

/// Operator role, used for event targeting (`target_roles`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Waiter,
    Bartender,
    Cook,
    Cashier,
}

/// Preparation destination carried by order payloads, if any
///
/// Emitters tag order payloads with `destination: "bar" | "kitchen"` when a
/// line is routed to one preparation area.
fn payload_destination(payload: &Value) -> Option<&str> {
    payload
        .get("destination")
        .or_else(|| payload.get("station"))
        .and_then(Value::as_str)
}

/// Owner (waiter) of the order carried by the payload, if any
fn payload_owner(payload: &Value) -> Option<&str> {
    payload
        .get("ownerId")
        .or_else(|| payload.get("waiterId"))
        .and_then(Value::as_str)
}

/// Should this station receive this event?
///
/// Deterministic and side-effect free. Evaluated server-side on fan-out
/// and client-side on delivery; identical inputs must produce identical
/// answers on both sides.
///
/// Rules:
/// - `order:esaurito:*` concerns every station (prep stops, the waiter
///   informs the table, the cashier sees the order change).
/// - `order:created` / `order:item:status` go to the preparation station
///   named by the payload destination (both prep stations when untagged),
///   to the owning waiter (every waiter when untagged), and never to the
///   cashier until payment.
/// - `payment:completed` goes to the cashier and to the owning waiter.
/// - `product:availability` goes to the prep station named by the payload
///   and to waiters (menu state); the cashier doesn't care.
/// - Unknown kinds pass: targeting via roles/stations is the primary
///   restriction, the filter only refines the kinds it knows.
pub fn should_receive(
    station: Station,
    kind: &str,
    payload: &Value,
    user_id: Option<&str>,
) -> bool {
    if kind.starts_with("order:esaurito:") {
        return true;
    }

    match kind {
        "order:created" | "order:item:status" => match station {
            Station::Bar | Station::Kitchen => payload_destination(payload)
                .map(|d| d == station.as_str())
                .unwrap_or(true),
            Station::Waiter => match (payload_owner(payload), user_id) {
                (Some(owner), Some(user)) => owner == user,
                _ => true,
            },
            Station::Cashier => false,
        },
        "payment:completed" => match station {
            Station::Cashier => true,
            Station::Waiter => match (payload_owner(payload), user_id) {
                (Some(owner), Some(user)) => owner == user,
                _ => true,
            },
            Station::Bar | Station::Kitchen => false,
        },
        "product:availability" => match station {
            Station::Bar | Station::Kitchen => payload_destination(payload)
                .map(|d| d == station.as_str())
                .unwrap_or(true),
            Station::Waiter => true,
            Station::Cashier => false,
        },
        _ => true,
    }
}
