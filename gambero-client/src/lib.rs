//! Gambero station client runtime
//!
//! Everything a station UI needs to stay consistent with the hub across
//! network partitions:
//!
//! - [`ConnectionManager`]: the push stream with backoff reconnect, gated
//!   by token presence, driven by discrete inputs
//! - [`StationCache`]: versioned last-known state served instantly on
//!   reconnect
//! - [`OptimisticUpdateLedger`]: local mutations reconciled against
//!   confirmed server changes
//!
//! The delivery callback is the only suspension point; nothing here blocks
//! the UI path.

pub mod cache;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod transport;

pub use cache::{CacheEntry, StationCache};
pub use connection::{ClientEvent, ConnectionConfig, ConnectionManager, backoff_delay};
pub use error::{ClientError, ClientResult};
pub use ledger::{OptimisticUpdate, OptimisticUpdateLedger, Reconciliation, RollbackNotice};
pub use transport::{Connector, TcpConnector, Transport};

// Shared protocol re-exports
pub use shared::event::{EntityChange, Event, EventPriority};
pub use shared::health::{ConnectionHealth, ConnectionQuality, ConnectionStatus};
pub use shared::station::{Role, Station};
