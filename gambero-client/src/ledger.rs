//! Optimistic update ledger
//!
//! Local mutations applied before server confirmation, reconciled against
//! the entity changes riding delivered events:
//!
//! - a change with `version == update.timestamp` confirms the update
//! - a change with `previous_version > update.timestamp` means the server
//!   moved past us: the update is removed and a rollback notice (carrying
//!   the rollback data) is broadcast
//! - anything unconfirmed is dropped unconditionally after a fixed timeout
//!
//! One outstanding update per `entity_type:entity_id`; a newer local
//! mutation silently supersedes the pending one. The version comparison
//! deliberately tolerates local-vs-server reordering races instead of
//! assuming global ordering.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::event::EntityChange;

/// A pending local mutation
#[derive(Debug, Clone)]
pub struct OptimisticUpdate {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub changes: Value,
    pub rollback_data: Value,
    /// Client-assigned version (Unix millis); the server confirms by
    /// echoing it as the entity change version
    pub timestamp: u64,
    pub confirmed: bool,
}

/// Broadcast when a pending update loses to the server
#[derive(Debug, Clone)]
pub struct RollbackNotice {
    pub update: OptimisticUpdate,
    /// The server version that superseded the local mutation
    pub server_version: u64,
}

/// Outcome of reconciling one entity change
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The change confirmed (and settled) a pending update
    Confirmed,
    /// The change rolled back a pending update
    RolledBack,
    /// No pending update involved
    Unrelated,
}

struct PendingEntry {
    update: OptimisticUpdate,
    applied_at: Instant,
}

struct LedgerInner {
    // entity_type:entity_id → pending entry
    pending: Mutex<HashMap<String, PendingEntry>>,
    rollback_tx: broadcast::Sender<RollbackNotice>,
    sweep_cancel: CancellationToken,
}

pub struct OptimisticUpdateLedger {
    inner: Arc<LedgerInner>,
}

impl Clone for OptimisticUpdateLedger {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn key_of(entity_type: &str, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}

impl OptimisticUpdateLedger {
    /// Create a ledger; unconfirmed updates die after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let (rollback_tx, _) = broadcast::channel(256);
        let inner = Arc::new(LedgerInner {
            pending: Mutex::new(HashMap::new()),
            rollback_tx,
            sweep_cancel: CancellationToken::new(),
        });

        let sweep_inner = inner.clone();
        let cancel = inner.sweep_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeout / 4);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let mut pending = sweep_inner.pending.lock();
                        pending.retain(|key, entry| {
                            let keep = now.duration_since(entry.applied_at) < timeout;
                            if !keep {
                                tracing::debug!(key = %key, "Optimistic update timed out, dropped");
                            }
                            keep
                        });
                    }
                }
            }
        });

        Self { inner }
    }

    /// Record a pending local mutation, superseding any prior one for the
    /// same entity; returns the update id
    pub fn apply(
        &self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        changes: Value,
        rollback_data: Value,
    ) -> Uuid {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        let update = OptimisticUpdate {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            entity_type: entity_type.clone(),
            entity_id: entity_id.clone(),
            changes,
            rollback_data,
            confirmed: false,
        };
        let id = update.id;

        let mut pending = self.inner.pending.lock();
        let replaced = pending.insert(
            key_of(&entity_type, &entity_id),
            PendingEntry {
                update,
                applied_at: Instant::now(),
            },
        );
        if replaced.is_some() {
            tracing::debug!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                "Pending optimistic update superseded"
            );
        }
        id
    }

    /// Reconcile one server entity change against the ledger
    pub fn observe(&self, change: &EntityChange) -> Reconciliation {
        let key = key_of(&change.entity_type, &change.entity_id);
        let mut pending = self.inner.pending.lock();

        let Some(entry) = pending.get_mut(&key) else {
            return Reconciliation::Unrelated;
        };

        if change.version == entry.update.timestamp {
            // Our own mutation came back confirmed; settle and forget
            entry.update.confirmed = true;
            pending.remove(&key);
            return Reconciliation::Confirmed;
        }

        if change
            .previous_version
            .is_some_and(|prev| prev > entry.update.timestamp)
        {
            // The server state moved past our base: local mutation loses
            let entry = pending.remove(&key).expect("entry checked");
            let notice = RollbackNotice {
                update: entry.update,
                server_version: change.version,
            };
            tracing::info!(
                entity_type = %change.entity_type,
                entity_id = %change.entity_id,
                server_version = change.version,
                "Optimistic update rolled back"
            );
            let _ = self.inner.rollback_tx.send(notice);
            return Reconciliation::RolledBack;
        }

        // Unrelated change (e.g. an older event replayed); keep waiting
        Reconciliation::Unrelated
    }

    /// Reconcile every entity change attached to an event
    pub fn observe_all(&self, changes: &[EntityChange]) {
        for change in changes {
            self.observe(change);
        }
    }

    /// Rollback notifications
    pub fn subscribe_rollbacks(&self) -> broadcast::Receiver<RollbackNotice> {
        self.inner.rollback_tx.subscribe()
    }

    /// The pending update for an entity, if any
    pub fn pending_for(&self, entity_type: &str, entity_id: &str) -> Option<OptimisticUpdate> {
        self.inner
            .pending
            .lock()
            .get(&key_of(entity_type, entity_id))
            .map(|e| e.update.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Stop the sweep and drop every pending update; idempotent
    pub fn destroy(&self) {
        self.inner.sweep_cancel.cancel();
        self.inner.pending.lock().clear();
    }
}

impl Drop for LedgerInner {
    fn drop(&mut self) {
        self.sweep_cancel.cancel();
    }
}
