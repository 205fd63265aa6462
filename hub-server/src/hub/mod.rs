//! Event distribution hub
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        EventHub                           │
//! │  ┌─────────────────── core (one lock) ─────────────────┐ │
//! │  │  next_id   ReplayBuffer   SubscriptionRegistry      │ │
//! │  │            RateLimiter                               │ │
//! │  └──────────────────────────────────────────────────────┘ │
//! │                     AckTracker (own lock)                 │
//! └───────────┬───────────────┬───────────────┬──────────────┘
//!             ▼               ▼               ▼
//!        subscriber q    subscriber q    subscriber q   (bounded mpsc,
//!             │               │               │          one writer task
//!             ▼               ▼               ▼          per connection)
//!          session         session         session
//! ```
//!
//! # Message flow
//!
//! ```text
//! domain op ──▶ emit() ──▶ id assign ──▶ replay append ──▶ fan-out
//!                                                      (station filter +
//!                                                       role targeting,
//!                                                       try_send only)
//! ```
//!
//! `emit` never waits on a subscriber: a full queue means the subscriber is
//! backed up, and the subscription is dropped instead of stalling the
//! caller. Id assignment, replay append and fan-out share one lock so every
//! subscriber observes non-decreasing ids, replay spliced before live.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shared::ack::AckRequest;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::event::{EntityChange, Event, EventPriority};
use shared::health::{ConnectionHealth, ConnectionStatus};
use shared::station::{Role, Station, should_receive};
use shared::wire::{PingPayload, PongPayload, ServerFrame, SubscribeOkPayload, SubscribeRequest};

pub mod ack;
pub mod heartbeat;
pub mod ratelimit;
pub mod registry;
pub mod replay;
pub mod session;

pub use ack::{AckRetryPolicy, AckTracker, backoff_delay};
pub use heartbeat::HeartbeatService;
pub use ratelimit::{RateLimitConfig, RateLimiter, default_dedup_key};
pub use registry::{SubscriberHandle, Subscription, SubscriptionRegistry};
pub use replay::{ReplayBuffer, ReplayOutcome};

/// Hub tuning knobs
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-subscriber outbound queue capacity
    pub channel_capacity: usize,
    /// Replay buffer entry bound
    pub replay_capacity: usize,
    /// Replay buffer age bound
    pub replay_retention: Duration,
    /// Heartbeat cadence
    pub heartbeat_interval: Duration,
    /// Missed heartbeats before a subscription is dropped
    pub max_missed_heartbeats: u32,
    /// Low-priority dedup policy
    pub rate_limit: RateLimitConfig,
    /// Unacked-event redelivery cadence
    pub ack_retry: AckRetryPolicy,
    /// Redeliveries before giving up on a subscriber's ack
    pub max_ack_attempts: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            replay_capacity: 256,
            replay_retention: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(30),
            max_missed_heartbeats: 3,
            rate_limit: RateLimitConfig::default(),
            ack_retry: AckRetryPolicy::default(),
            max_ack_attempts: 5,
        }
    }
}

/// Per-emit options
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub priority: EventPriority,
    /// Deliver to every subscriber, ignoring targeting and the station filter
    pub broadcast: bool,
    pub target_roles: Vec<Role>,
    pub target_stations: Option<Vec<Station>>,
    pub entity_changes: Option<Vec<EntityChange>>,
    /// Bypass low-priority rate limiting
    pub skip_rate_limit: bool,
    pub acknowledgment_required: bool,
}

struct HubCore {
    next_id: u64,
    session_seq: u64,
    replay: ReplayBuffer,
    registry: SubscriptionRegistry,
    limiter: RateLimiter,
}

/// The hub. Cheap to clone; all clones share state.
///
/// Explicitly owned service: create with [`EventHub::new`], tear down with
/// [`EventHub::shutdown`]. No module-level singleton, so tests and
/// multi-instance deployments each own their hub.
#[derive(Clone)]
pub struct EventHub {
    core: Arc<Mutex<HubCore>>,
    acks: Arc<AckTracker>,
    config: Arc<HubConfig>,
    shutdown_token: CancellationToken,
}

impl EventHub {
    pub fn new() -> Self {
        Self::from_config(HubConfig::default())
    }

    pub fn from_config(config: HubConfig) -> Self {
        let core = HubCore {
            next_id: 0,
            session_seq: 0,
            replay: ReplayBuffer::new(config.replay_capacity, config.replay_retention),
            registry: SubscriptionRegistry::default(),
            limiter: RateLimiter::new(config.rate_limit.clone()),
        };
        Self {
            core: Arc::new(Mutex::new(core)),
            acks: Arc::new(AckTracker::new(config.ack_retry, config.max_ack_attempts)),
            config: Arc::new(config),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn ack_tracker(&self) -> &AckTracker {
        &self.acks
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    /// Gracefully shut down the hub and everything running on its token
    pub fn shutdown(&self) {
        tracing::info!("Shutting down event hub");
        self.shutdown_token.cancel();
    }

    /// Highest event id assigned so far
    pub fn last_event_id(&self) -> u64 {
        self.core.lock().next_id
    }

    /// Connected subscription snapshot (introspection)
    pub fn connected_clients(&self) -> Vec<Subscription> {
        self.core.lock().registry.snapshot()
    }

    // ==================== Emit ====================

    /// Emit a domain event to every matching live subscription
    ///
    /// Fire-and-forget: the caller never waits on subscriber queues.
    /// Returns the assigned event id, or `None` when the event was collapsed
    /// by the low-priority rate limiter.
    pub fn emit(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
        opts: EmitOptions,
    ) -> AppResult<Option<u64>> {
        let mut event = Event::new(kind, payload).with_priority(opts.priority);
        event.target_roles = opts.target_roles;
        event.target_stations = opts.target_stations;
        event.entity_changes = opts.entity_changes;
        event.acknowledgment_required = opts.acknowledgment_required;

        let now = Instant::now();
        let mut core = self.core.lock();

        // Ack-required events are never rate-limited
        let limitable = event.priority == EventPriority::Low
            && !opts.skip_rate_limit
            && !event.acknowledgment_required;
        if limitable && !core.limiter.allow(&event, now) {
            tracing::debug!(kind = %event.kind, "Low-priority event collapsed by rate limiter");
            return Ok(None);
        }

        core.next_id += 1;
        event.id = core.next_id;
        core.replay.push(event.clone(), now);

        let mut delivered_to: Vec<String> = Vec::new();
        let mut backed_up: Vec<String> = Vec::new();

        for handle in core.registry.iter_mut() {
            if !opts.broadcast && !Self::matches(&event, &handle.info) {
                continue;
            }
            match handle.tx.try_send(ServerFrame::Event(event.clone())) {
                Ok(()) => {
                    handle.info.last_event_id = event.id;
                    if event.acknowledgment_required {
                        delivered_to.push(handle.info.client_id.clone());
                    }
                }
                Err(_) => {
                    // Full or closed: disconnect rather than stall emit
                    backed_up.push(handle.info.client_id.clone());
                }
            }
        }

        for client_id in &backed_up {
            core.registry.remove(client_id);
            tracing::warn!(
                client_id = %client_id,
                event_id = event.id,
                code = %ErrorCode::SubscriberLagged,
                "Subscriber queue backed up, dropping subscription"
            );
        }
        drop(core);

        for client_id in &backed_up {
            self.acks.clear_client(client_id);
        }
        for client_id in &delivered_to {
            self.acks.track(&event, client_id, now);
        }

        tracing::debug!(
            event_id = event.id,
            kind = %event.kind,
            priority = ?event.priority,
            "Event emitted"
        );
        Ok(Some(event.id))
    }

    fn matches(event: &Event, sub: &Subscription) -> bool {
        if !event.target_roles.is_empty() && !event.target_roles.contains(&sub.role) {
            return false;
        }
        if let Some(stations) = &event.target_stations
            && !stations.is_empty()
            && !stations.contains(&sub.station)
        {
            return false;
        }
        should_receive(sub.station, &event.kind, &event.payload, sub.user_id.as_deref())
    }

    // ==================== Subscribe / Unsubscribe ====================

    /// Register a subscription and splice replay before live
    ///
    /// The caller (session) has already validated the token. Everything
    /// here happens under the core lock: no live event can interleave
    /// between the replayed batch and the registration.
    pub fn subscribe(
        &self,
        req: &SubscribeRequest,
    ) -> AppResult<(SubscribeOkPayload, mpsc::Receiver<ServerFrame>, u64)> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let now = Instant::now();
        let mut core = self.core.lock();

        let last_assigned = core.next_id;
        let outcome = core.replay.since(req.last_event_id, last_assigned, now);
        let resync_required = matches!(outcome, ReplayOutcome::Expired);

        let mut info = Subscription::from_request(req);
        if let ReplayOutcome::Events(events) = outcome {
            for event in events {
                // Client-side filtering happened before the cursor moved, so
                // replay re-applies the same predicate the live path uses.
                if !Self::matches(&event, &info) {
                    continue;
                }
                info.last_event_id = event.id;
                tx.try_send(ServerFrame::Event(event)).map_err(|_| {
                    AppError::with_message(
                        ErrorCode::SubscriberLagged,
                        "Replay exceeds subscriber queue capacity",
                    )
                })?;
            }
        }

        core.session_seq += 1;
        let session = core.session_seq;
        let replaced = core.registry.insert(SubscriberHandle::new(info, session, tx));
        drop(core);

        if replaced.is_some() {
            tracing::info!(client_id = %req.client_id, "Subscription replaced by reconnect");
        } else {
            tracing::info!(
                client_id = %req.client_id,
                station = ?req.station,
                role = ?req.role,
                "Subscription registered"
            );
        }

        Ok((
            SubscribeOkPayload {
                resync_required,
                last_event_id: last_assigned,
            },
            rx,
            session,
        ))
    }

    /// Drop a subscription (forceful: heartbeat exhaustion, admin)
    pub fn unsubscribe(&self, client_id: &str) {
        let removed = self.core.lock().registry.remove(client_id);
        if removed.is_some() {
            self.acks.clear_client(client_id);
            tracing::info!(client_id = %client_id, "Subscription removed");
        }
    }

    /// Drop a subscription only if it still belongs to this session
    ///
    /// A session ending after its client already reconnected must not take
    /// the successor subscription down with it.
    pub fn unsubscribe_session(&self, client_id: &str, session: u64) {
        let removed = {
            let mut core = self.core.lock();
            match core.registry.get(client_id) {
                Some(handle) if handle.session == session => core.registry.remove(client_id),
                _ => None,
            }
        };
        if removed.is_some() {
            self.acks.clear_client(client_id);
            tracing::info!(client_id = %client_id, session, "Subscription removed");
        }
    }

    // ==================== Heartbeat ====================

    /// One heartbeat round: cull silent subscribers, ping the rest,
    /// redeliver due unacked events
    ///
    /// Driven by the heartbeat service on `heartbeat_interval`; exposed for
    /// tests to drive time explicitly.
    pub fn heartbeat_tick(&self) {
        let now = Instant::now();
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Phase 1 (core lock): cull + snapshot
        let mut dead: Vec<String> = Vec::new();
        let mut live: Vec<(String, mpsc::Sender<ServerFrame>, ConnectionHealth)> = Vec::new();
        {
            let mut core = self.core.lock();
            for handle in core.registry.iter_mut() {
                handle.missed_heartbeats += 1;
                if handle.missed_heartbeats > self.config.max_missed_heartbeats {
                    dead.push(handle.info.client_id.clone());
                } else {
                    live.push((
                        handle.info.client_id.clone(),
                        handle.tx.clone(),
                        handle.health.clone(),
                    ));
                }
            }
            for client_id in &dead {
                core.registry.remove(client_id);
            }
        }

        for client_id in &dead {
            self.acks.clear_client(client_id);
            tracing::warn!(client_id = %client_id, "Subscriber missed too many heartbeats, dropped");
        }

        // Phase 2 (no core lock): pings + ack redelivery
        for (client_id, tx, health) in live {
            let pending_acks = self.acks.pending_ids(&client_id);
            let ping = ServerFrame::Ping(PingPayload {
                sent_at: now_ms,
                health,
                pending_acks,
            });
            if tx.try_send(ping).is_err() {
                self.drop_backed_up(&client_id);
                continue;
            }

            for event in self.acks.due_for_retry(&client_id, now) {
                tracing::debug!(
                    client_id = %client_id,
                    event_id = event.id,
                    "Redelivering unacked event"
                );
                if tx.try_send(ServerFrame::Event(event)).is_err() {
                    self.drop_backed_up(&client_id);
                    break;
                }
            }
        }
    }

    fn drop_backed_up(&self, client_id: &str) {
        tracing::warn!(
            client_id = %client_id,
            code = %ErrorCode::SubscriberLagged,
            "Subscriber queue backed up during heartbeat, dropping subscription"
        );
        self.unsubscribe(client_id);
    }

    /// Apply a pong: latency probe + ack echoes
    pub fn handle_pong(&self, client_id: &str, pong: &PongPayload) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let latency_ms = now_ms.saturating_sub(pong.echo_sent_at).max(0) as u64;

        {
            let mut core = self.core.lock();
            if let Some(handle) = core.registry.get_mut(client_id) {
                handle.missed_heartbeats = 0;
                handle.health.status = ConnectionStatus::Connected;
                handle.health.record_latency(latency_ms);
                handle.health.last_event_at = Some(now_ms);
            }
        }

        for ack in &pong.acks {
            self.acks.ack(ack);
        }
    }

    /// Apply a standalone acknowledgment (in-stream frame or HTTP route)
    pub fn handle_ack(&self, req: &AckRequest) {
        self.acks.ack(req);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
