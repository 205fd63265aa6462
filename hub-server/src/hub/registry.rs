//! Subscription registry: client id → live subscription
//!
//! Owned by the hub core lock; every mutation happens under it so event-id
//! assignment, replay splicing, and fan-out stay serialized.

use shared::health::ConnectionHealth;
use shared::station::{Role, Station};
use shared::wire::{ServerFrame, SubscribeRequest};
use tokio::sync::mpsc;

use std::collections::HashMap;

/// Static identity of one subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    pub client_id: String,
    pub role: Role,
    pub station: Station,
    pub user_id: Option<String>,
    /// Unix milliseconds
    pub connected_at: i64,
    /// Highest event id enqueued to this subscriber
    pub last_event_id: u64,
}

impl Subscription {
    pub fn from_request(req: &SubscribeRequest) -> Self {
        Self {
            client_id: req.client_id.clone(),
            role: req.role,
            station: req.station,
            user_id: req.user_id.clone(),
            connected_at: chrono::Utc::now().timestamp_millis(),
            last_event_id: req.last_event_id.unwrap_or(0),
        }
    }
}

/// A subscription plus its delivery bookkeeping
pub struct SubscriberHandle {
    pub info: Subscription,
    /// Hub-unique session sequence; a reconnect gets a new one, so a stale
    /// session tearing down cannot remove its successor
    pub session: u64,
    /// Single-writer outbound queue, drained by the connection's writer task
    pub tx: mpsc::Sender<ServerFrame>,
    pub missed_heartbeats: u32,
    pub health: ConnectionHealth,
}

impl SubscriberHandle {
    pub fn new(info: Subscription, session: u64, tx: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            info,
            session,
            tx,
            missed_heartbeats: 0,
            health: ConnectionHealth {
                status: shared::health::ConnectionStatus::Connected,
                ..Default::default()
            },
        }
    }
}

/// The registry proper
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: HashMap<String, SubscriberHandle>,
}

impl SubscriptionRegistry {
    pub fn insert(&mut self, handle: SubscriberHandle) -> Option<SubscriberHandle> {
        // A reconnecting client replaces its stale handle; the old writer
        // task sees its queue close and exits.
        self.subscribers.insert(handle.info.client_id.clone(), handle)
    }

    pub fn remove(&mut self, client_id: &str) -> Option<SubscriberHandle> {
        self.subscribers.remove(client_id)
    }

    pub fn get(&self, client_id: &str) -> Option<&SubscriberHandle> {
        self.subscribers.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut SubscriberHandle> {
        self.subscribers.get_mut(client_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubscriberHandle> {
        self.subscribers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Connected client snapshot for introspection (health route)
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.subscribers.values().map(|h| h.info.clone()).collect()
    }
}
