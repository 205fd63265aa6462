//! Shared types for the Gambero real-time framework
//!
//! Common types used by both the hub server and the station clients:
//! the event model, the wire protocol, the station filter, acknowledgment
//! and health types, and the out-of-stock order domain model.
//!
//! Everything in this crate is pure data + pure functions. Keeping the
//! station filter here means server-side fan-out and client-side
//! re-filtering cannot disagree.

pub mod ack;
pub mod error;
pub mod esaurito;
pub mod event;
pub mod health;
pub mod order;
pub mod station;
pub mod wire;

// Re-exports
pub use http;
pub use serde::{Deserialize, Serialize};

// Event model re-exports (for convenient access)
pub use event::{EntityChange, EntityOperation, Event, EventPriority, IncomingEvent};
pub use station::{Role, Station, should_receive};
pub use wire::{ClientFrame, FrameType, PROTOCOL_VERSION, ServerFrame};
