//! Acknowledgment tracker
//!
//! Tracks every (event, subscriber) pair that still owes an ack, drives
//! redelivery of high/urgent-priority events on heartbeat ticks, and
//! escalates when a subscriber never answers. Shared by concurrent emitters
//! and the heartbeat loop, so it carries its own lock.

use parking_lot::Mutex;
use shared::ack::{AckRequest, AckStatus};
use shared::event::{Event, EventPriority};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Redelivery cadence for unacknowledged events
///
/// Whether ack retries follow the connection backoff curve or stay tied to
/// the heartbeat is a deployment decision; both are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRetryPolicy {
    /// Redeliver on every heartbeat tick
    EveryHeartbeat,
    /// Exponential backoff between redeliveries, capped
    Backoff { base: Duration, cap: Duration },
}

impl Default for AckRetryPolicy {
    fn default() -> Self {
        AckRetryPolicy::EveryHeartbeat
    }
}

struct PendingAck {
    event: Event,
    /// Redelivery count (0 = only the original delivery so far)
    attempts: u32,
    last_sent: Instant,
}

#[derive(Default)]
struct TrackerState {
    // (event id, client id) → pending entry
    pending: HashMap<(u64, String), PendingAck>,
}

pub struct AckTracker {
    state: Mutex<TrackerState>,
    policy: AckRetryPolicy,
    max_attempts: u32,
}

impl AckTracker {
    pub fn new(policy: AckRetryPolicy, max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            policy,
            max_attempts,
        }
    }

    /// Start tracking a delivered acknowledgment-required event
    pub fn track(&self, event: &Event, client_id: &str, now: Instant) {
        let mut state = self.state.lock();
        state
            .pending
            .entry((event.id, client_id.to_string()))
            .or_insert_with(|| PendingAck {
                event: event.clone(),
                attempts: 0,
                last_sent: now,
            });
    }

    /// Apply a client acknowledgment; idempotent
    ///
    /// Any status settles the pending entry: `Received` confirms delivery,
    /// which is what at-least-once needs. `Failed` is logged for operators.
    pub fn ack(&self, req: &AckRequest) {
        let mut state = self.state.lock();
        let known = state
            .pending
            .remove(&(req.event_id, req.client_id.clone()))
            .is_some();

        match req.status {
            AckStatus::Failed => {
                tracing::error!(
                    event_id = req.event_id,
                    client_id = %req.client_id,
                    error = req.error.as_deref().unwrap_or("unknown"),
                    "Client failed to process event"
                );
            }
            _ if !known => {
                tracing::debug!(
                    event_id = req.event_id,
                    client_id = %req.client_id,
                    "Duplicate or unknown ack"
                );
            }
            _ => {}
        }
    }

    /// Event ids this client still owes an ack for (heartbeat metadata)
    pub fn pending_ids(&self, client_id: &str) -> Vec<u64> {
        let state = self.state.lock();
        let mut ids: Vec<u64> = state
            .pending
            .keys()
            .filter(|(_, c)| c == client_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// High/urgent events due for redelivery to this client
    ///
    /// Marks returned events as redelivered. Entries exceeding
    /// `max_attempts` are escalated: logged and dropped from tracking.
    pub fn due_for_retry(&self, client_id: &str, now: Instant) -> Vec<Event> {
        let mut state = self.state.lock();
        let mut due = Vec::new();
        let mut escalated = Vec::new();

        for ((event_id, client), entry) in state.pending.iter_mut() {
            if client != client_id || entry.event.priority < EventPriority::High {
                continue;
            }

            let ready = match self.policy {
                AckRetryPolicy::EveryHeartbeat => true,
                AckRetryPolicy::Backoff { base, cap } => {
                    let delay = backoff_delay(base, cap, entry.attempts + 1);
                    now.duration_since(entry.last_sent) >= delay
                }
            };
            if !ready {
                continue;
            }

            if entry.attempts >= self.max_attempts {
                escalated.push((*event_id, client.clone()));
                continue;
            }

            entry.attempts += 1;
            entry.last_sent = now;
            due.push(entry.event.clone());
        }

        for key in escalated {
            state.pending.remove(&key);
            tracing::error!(
                event_id = key.0,
                client_id = %key.1,
                max_attempts = self.max_attempts,
                "Ack never arrived, giving up on redelivery"
            );
        }

        due.sort_unstable_by_key(|e| e.id);
        due
    }

    /// Forget everything owed by a departing subscriber
    pub fn clear_client(&self, client_id: &str) {
        let mut state = self.state.lock();
        state.pending.retain(|(_, c), _| c != client_id);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// `min(base · 2^(attempts-1), cap)`
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exp).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ack_event(id: u64, priority: EventPriority) -> Event {
        let mut e = Event::new("order:esaurito:resolved", json!({}))
            .with_priority(priority)
            .require_ack();
        e.id = id;
        e
    }

    #[test]
    fn test_ack_settles_pending() {
        let tracker = AckTracker::new(AckRetryPolicy::EveryHeartbeat, 5);
        let now = Instant::now();
        tracker.track(&ack_event(1, EventPriority::High), "c1", now);
        assert_eq!(tracker.pending_ids("c1"), vec![1]);

        tracker.ack(&AckRequest::received(1, "c1"));
        assert!(tracker.pending_ids("c1").is_empty());

        // Idempotent: re-ack of a settled event is a no-op
        tracker.ack(&AckRequest::processed(1, "c1"));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_retry_only_high_priority() {
        let tracker = AckTracker::new(AckRetryPolicy::EveryHeartbeat, 5);
        let now = Instant::now();
        tracker.track(&ack_event(1, EventPriority::Normal), "c1", now);
        tracker.track(&ack_event(2, EventPriority::High), "c1", now);
        tracker.track(&ack_event(3, EventPriority::Urgent), "c1", now);

        let due: Vec<u64> = tracker
            .due_for_retry("c1", now)
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(due, vec![2, 3]);
        // Normal-priority entry stays tracked (pending ids) but is never pushed
        assert_eq!(tracker.pending_ids("c1"), vec![1, 2, 3]);
    }

    #[test]
    fn test_backoff_policy_spacing() {
        let base = Duration::from_secs(1);
        let tracker = AckTracker::new(
            AckRetryPolicy::Backoff {
                base,
                cap: Duration::from_secs(8),
            },
            5,
        );
        let start = Instant::now();
        tracker.track(&ack_event(1, EventPriority::High), "c1", start);

        // First retry due after base
        assert!(tracker.due_for_retry("c1", start).is_empty());
        assert_eq!(tracker.due_for_retry("c1", start + base).len(), 1);
        // Second retry due after 2·base more
        assert!(tracker
            .due_for_retry("c1", start + base + Duration::from_millis(1500))
            .is_empty());
        assert_eq!(
            tracker
                .due_for_retry("c1", start + base + Duration::from_secs(2))
                .len(),
            1
        );
    }

    #[test]
    fn test_escalation_drops_entry() {
        let tracker = AckTracker::new(AckRetryPolicy::EveryHeartbeat, 2);
        let now = Instant::now();
        tracker.track(&ack_event(1, EventPriority::Urgent), "c1", now);

        assert_eq!(tracker.due_for_retry("c1", now).len(), 1);
        assert_eq!(tracker.due_for_retry("c1", now).len(), 1);
        // Third tick: attempts exhausted, escalated and dropped
        assert!(tracker.due_for_retry("c1", now).is_empty());
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_clear_client() {
        let tracker = AckTracker::new(AckRetryPolicy::EveryHeartbeat, 5);
        let now = Instant::now();
        tracker.track(&ack_event(1, EventPriority::High), "c1", now);
        tracker.track(&ack_event(1, EventPriority::High), "c2", now);

        tracker.clear_client("c1");
        assert!(tracker.pending_ids("c1").is_empty());
        assert_eq!(tracker.pending_ids("c2"), vec![1]);
    }

    #[test]
    fn test_backoff_delay_formula() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, cap, 6), Duration::from_secs(30)); // capped at 32→30
        assert_eq!(backoff_delay(base, cap, 20), Duration::from_secs(30));
    }
}
