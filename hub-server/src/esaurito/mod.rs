//! Out-of-stock (esaurito) order workflow
//!
//! The concrete domain workflow riding the event channel: records, the
//! one-way state machine, and the storage seams it mutates through.

pub mod service;
pub mod store;

pub use service::EsauritoService;
pub use store::{InMemoryInventoryStore, InMemoryOrderStore, InventoryStore, OrderStore};
