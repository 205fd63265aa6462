//! Replay buffer: bounded window of recent events for reconnect catch-up
//!
//! Bounded twice: at most `capacity` entries, none older than `retention`.
//! Eviction remembers the highest evicted id so a stale cursor is reported
//! as "resync required" instead of being silently skipped over.

use shared::event::Event;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of a replay lookup
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// Nothing to replay; the cursor is current (or the client is new)
    UpToDate,
    /// Events strictly after the cursor, in id order
    Events(Vec<Event>),
    /// The cursor fell outside the retention window; full resync required
    Expired,
}

pub struct ReplayBuffer {
    entries: VecDeque<(Instant, Event)>,
    capacity: usize,
    retention: Duration,
    /// Highest id ever evicted from the window
    oldest_evicted_id: u64,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            retention,
            oldest_evicted_id: 0,
        }
    }

    /// Append an event (already carrying its assigned id)
    pub fn push(&mut self, event: Event, now: Instant) {
        self.evict_expired(now);
        if self.entries.len() == self.capacity
            && let Some((_, evicted)) = self.entries.pop_front()
        {
            self.oldest_evicted_id = self.oldest_evicted_id.max(evicted.id);
        }
        self.entries.push_back((now, event));
    }

    /// Events strictly after `cursor`, or the resync signal
    ///
    /// `last_assigned` is the hub's current id high-water mark; a cursor
    /// beyond it belongs to a previous hub incarnation and also demands a
    /// resync.
    pub fn since(&mut self, cursor: Option<u64>, last_assigned: u64, now: Instant) -> ReplayOutcome {
        self.evict_expired(now);

        let Some(cursor) = cursor else {
            // Fresh client: live stream only
            return ReplayOutcome::UpToDate;
        };

        if cursor > last_assigned || cursor < self.oldest_evicted_id {
            return ReplayOutcome::Expired;
        }

        let events: Vec<Event> = self
            .entries
            .iter()
            .filter(|(_, e)| e.id > cursor)
            .map(|(_, e)| e.clone())
            .collect();

        if events.is_empty() {
            ReplayOutcome::UpToDate
        } else {
            ReplayOutcome::Events(events)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((inserted_at, _)) = self.entries.front() {
            if now.duration_since(*inserted_at) <= self.retention {
                break;
            }
            let (_, evicted) = self.entries.pop_front().expect("front checked");
            self.oldest_evicted_id = self.oldest_evicted_id.max(evicted.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: u64) -> Event {
        let mut e = Event::new("order:created", json!({}));
        e.id = id;
        e
    }

    #[test]
    fn test_replay_after_cursor() {
        let now = Instant::now();
        let mut buf = ReplayBuffer::new(16, Duration::from_secs(60));
        for id in 1..=5 {
            buf.push(event(id), now);
        }

        match buf.since(Some(2), 5, now) {
            ReplayOutcome::Events(events) => {
                let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
                assert_eq!(ids, vec![3, 4, 5]);
            }
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[test]
    fn test_caught_up_cursor() {
        let now = Instant::now();
        let mut buf = ReplayBuffer::new(16, Duration::from_secs(60));
        for id in 1..=3 {
            buf.push(event(id), now);
        }
        assert_eq!(buf.since(Some(3), 3, now), ReplayOutcome::UpToDate);
        assert_eq!(buf.since(None, 3, now), ReplayOutcome::UpToDate);
    }

    #[test]
    fn test_capacity_eviction_expires_cursor() {
        let now = Instant::now();
        let mut buf = ReplayBuffer::new(3, Duration::from_secs(60));
        for id in 1..=5 {
            buf.push(event(id), now);
        }
        // ids 1 and 2 were evicted; a cursor of 1 cannot be served
        assert_eq!(buf.since(Some(1), 5, now), ReplayOutcome::Expired);
        // id 2 is the highest evicted id: cursor 2 is exactly resumable
        match buf.since(Some(2), 5, now) {
            ReplayOutcome::Events(events) => assert_eq!(events.len(), 3),
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[test]
    fn test_retention_eviction_expires_cursor() {
        let start = Instant::now();
        let mut buf = ReplayBuffer::new(16, Duration::from_secs(60));
        buf.push(event(1), start);
        buf.push(event(2), start + Duration::from_secs(90));

        let later = start + Duration::from_secs(120);
        // id 1 aged out of the window
        assert_eq!(buf.since(Some(0), 2, later), ReplayOutcome::Expired);
        match buf.since(Some(1), 2, later) {
            ReplayOutcome::Events(events) => assert_eq!(events[0].id, 2),
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[test]
    fn test_future_cursor_from_previous_incarnation() {
        let now = Instant::now();
        let mut buf = ReplayBuffer::new(16, Duration::from_secs(60));
        buf.push(event(1), now);
        // Client remembers id 40 from before a hub restart
        assert_eq!(buf.since(Some(40), 1, now), ReplayOutcome::Expired);
    }
}
