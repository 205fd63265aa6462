//! Low-priority event rate limiting
//!
//! Dedup by key within a sliding window: two low-priority events with the
//! same key inside the window collapse to one delivery. The key function is
//! a configurable policy; acknowledgment-required events bypass the limiter
//! entirely (enforced by the hub, not here).

use shared::event::Event;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key extraction policy
pub type DedupKeyFn = Arc<dyn Fn(&Event) -> String + Send + Sync>;

/// Default key: event kind, refined by the first entity id when present
pub fn default_dedup_key(event: &Event) -> String {
    match event.first_entity_id() {
        Some(entity_id) => format!("{}:{}", event.kind, entity_id),
        None => event.kind.clone(),
    }
}

#[derive(Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub key_fn: DedupKeyFn,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2),
            key_fn: Arc::new(default_dedup_key),
        }
    }
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    seen: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            seen: HashMap::new(),
        }
    }

    /// True if the event may pass; records the key when it does
    pub fn allow(&mut self, event: &Event, now: Instant) -> bool {
        let key = (self.config.key_fn)(event);
        if let Some(last) = self.seen.get(&key)
            && now.duration_since(*last) < self.config.window
        {
            return false;
        }
        self.seen.insert(key, now);
        self.prune(now);
        true
    }

    fn prune(&mut self, now: Instant) {
        // Keep the map from accumulating dead keys
        if self.seen.len() > 1024 {
            let window = self.config.window;
            self.seen.retain(|_, last| now.duration_since(*last) < window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::event::{EntityChange, EntityOperation};

    fn low_event(kind: &str) -> Event {
        Event::new(kind, json!({}))
    }

    #[test]
    fn test_dedup_within_window() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Instant::now();

        assert!(limiter.allow(&low_event("product:availability"), now));
        assert!(!limiter.allow(&low_event("product:availability"), now + Duration::from_millis(500)));
        // Window elapsed: allowed again
        assert!(limiter.allow(&low_event("product:availability"), now + Duration::from_secs(3)));
    }

    #[test]
    fn test_distinct_entities_pass() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Instant::now();

        let with_entity = |id: &str| {
            low_event("product:availability").with_entity_changes(vec![EntityChange {
                entity_type: "product".into(),
                entity_id: id.into(),
                operation: EntityOperation::Update,
                version: 1,
                previous_version: None,
            }])
        };

        assert!(limiter.allow(&with_entity("p1"), now));
        assert!(limiter.allow(&with_entity("p2"), now));
        assert!(!limiter.allow(&with_entity("p1"), now));
    }

    #[test]
    fn test_custom_key_policy() {
        let config = RateLimitConfig {
            window: Duration::from_secs(1),
            key_fn: Arc::new(|e: &Event| e.kind.clone()),
        };
        let mut limiter = RateLimiter::new(config);
        let now = Instant::now();

        let with_entity = |id: &str| {
            low_event("product:availability").with_entity_changes(vec![EntityChange {
                entity_type: "product".into(),
                entity_id: id.into(),
                operation: EntityOperation::Update,
                version: 1,
                previous_version: None,
            }])
        };

        // Kind-only policy collapses distinct entities too
        assert!(limiter.allow(&with_entity("p1"), now));
        assert!(!limiter.allow(&with_entity("p2"), now));
    }
}
