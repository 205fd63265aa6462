//! Connection manager: the reconnect state machine
//!
//! ```text
//! disconnected ──connect()──▶ connecting ──SubscribeOk──▶ connected
//!      ▲                          ▲  │                        │
//!      │ max attempts /           │  │ dial/handshake     transport
//!      │ token lost               │  │ IO failure           error
//!      │                          │  ▼                        ▼
//!      └────────────────────── error ◀────────────────────────┘
//!                                 │
//!                                 └─ timer: min(base·2^(k-1), cap)
//! ```
//!
//! The machine owns its own fields and is driven by discrete inputs
//! (`connect`, transport error, timer fire, `on_token_changed`,
//! `on_foreground`, `disconnect`), never by a render cycle. Every public
//! mutator is safe against the background read loop. `disconnect()` is the
//! sole cancellation point: it synchronously cancels the stream and any
//! pending timer, and calling it twice is a no-op.
//!
//! Without a token the machine refuses to leave `disconnected`: no token,
//! no attempt, no loop. Token presence is re-checked when a backoff timer
//! fires, so revocation during the wait settles the machine instead of
//! dialing with a dead credential.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use shared::ack::AckRequest;
use shared::event::Event;
use shared::health::{ConnectionHealth, ConnectionStatus};
use shared::station::{Role, Station, should_receive};
use shared::wire::{
    ClientFrame, ClosePayload, PROTOCOL_VERSION, PingPayload, ServerFrame, SubscribeRequest,
};

use crate::error::{ClientError, ClientResult};
use crate::transport::{Connector, Transport, read_server_frame, write_client_frame};

/// `min(base · 2^(k-1), cap)` for attempt k
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exp).min(cap)
}

/// Connection manager tuning
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub client_id: String,
    pub role: Role,
    pub station: Station,
    pub user_id: Option<String>,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl ConnectionConfig {
    pub fn new(client_id: impl Into<String>, role: Role, station: Station) -> Self {
        Self {
            client_id: client_id.into(),
            role,
            station,
            user_id: None,
            auto_reconnect: true,
            max_reconnect_attempts: 10,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// What the manager surfaces to the application
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A delivered event that passed the station filter
    Event(Event),
    /// The replay cursor fell out of the server window: refetch everything
    /// instead of assuming you are caught up
    ResyncRequired,
    StatusChanged(ConnectionStatus),
}

struct SessionHandle {
    cancel: CancellationToken,
    transport: Arc<dyn Transport>,
}

struct ManagerState {
    status: ConnectionStatus,
    token: Option<String>,
    attempts: u32,
    last_event_id: Option<u64>,
    health: ConnectionHealth,
    session: Option<SessionHandle>,
    reconnect_timer: Option<(u64, CancellationToken)>,
    timer_gen: u64,
    /// Bumped on every (re)connect and disconnect; stale session callbacks
    /// compare epochs and give up instead of fighting the current session
    epoch: u64,
    pending_acks: Vec<AckRequest>,
}

struct ManagerInner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<ManagerState>,
    events_tx: broadcast::Sender<ClientEvent>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                state: Mutex::new(ManagerState {
                    status: ConnectionStatus::Disconnected,
                    token: None,
                    attempts: 0,
                    last_event_id: None,
                    health: ConnectionHealth::default(),
                    session: None,
                    reconnect_timer: None,
                    timer_gen: 0,
                    epoch: 0,
                    pending_acks: Vec::new(),
                }),
                events_tx,
            }),
        }
    }

    // ==================== Introspection ====================

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn health(&self) -> ConnectionHealth {
        let s = self.inner.state.lock();
        let mut health = s.health.clone();
        health.status = s.status;
        health.reconnect_attempts = s.attempts;
        health
    }

    pub fn last_event_id(&self) -> Option<u64> {
        self.inner.state.lock().last_event_id
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    /// Pending reconnect timers (0 or 1); must be 0 after `disconnect()`
    pub fn pending_timers(&self) -> usize {
        usize::from(self.inner.state.lock().reconnect_timer.is_some())
    }

    /// Subscribe to delivered events and status changes
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events_tx.subscribe()
    }

    // ==================== Inputs ====================

    /// Token input from the owning session manager
    ///
    /// `None` (revoked/logged out) tears the session down and stops every
    /// retry; a new token just gets stored, reconnection stays explicit.
    pub fn on_token_changed(&self, token: Option<String>) {
        let mut s = self.inner.state.lock();
        let lost = token.is_none();
        s.token = token;
        if lost {
            tracing::info!("Token lost, settling disconnected");
            self.teardown_locked(&mut s);
        }
    }

    /// Foreground/visibility signal: reconnect if nothing is alive
    pub async fn on_foreground(&self) {
        let should_connect = {
            let s = self.inner.state.lock();
            s.token.is_some()
                && s.session.is_none()
                && s.reconnect_timer.is_none()
                && !matches!(s.status, ConnectionStatus::Connecting | ConnectionStatus::Connected)
        };
        if should_connect {
            tracing::debug!("Foreground signal, attempting reconnect");
            let _ = self.connect().await;
        }
    }

    /// Explicit connect
    ///
    /// Requires a token: without one the manager stays disconnected and
    /// never loops. Already connected/connecting is a no-op.
    pub async fn connect(&self) -> ClientResult<()> {
        let epoch = {
            let mut s = self.inner.state.lock();
            if matches!(
                s.status,
                ConnectionStatus::Connected | ConnectionStatus::Connecting
            ) {
                return Ok(());
            }
            if s.token.is_none() {
                tracing::warn!("connect() refused: no token");
                return Err(ClientError::TokenMissing);
            }
            if let Some((_, timer)) = s.reconnect_timer.take() {
                timer.cancel();
            }
            s.epoch += 1;
            self.set_status_locked(&mut s, ConnectionStatus::Connecting);
            s.epoch
        };

        self.try_connect(epoch).await
    }

    /// The sole cancellation point
    ///
    /// Synchronously stops the stream, clears any pending reconnect timer,
    /// resets the attempt counter. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut s = self.inner.state.lock();
        self.teardown_locked(&mut s);
    }

    /// Queue a `Processed` ack, echoed on the next heartbeat
    pub fn ack_processed(&self, event_id: u64) {
        let ack = AckRequest::processed(event_id, self.inner.config.client_id.clone());
        self.inner.state.lock().pending_acks.push(ack);
    }

    /// Queue a `Failed` ack, echoed on the next heartbeat
    pub fn ack_failed(&self, event_id: u64, error: impl Into<String>) {
        let ack = AckRequest::failed(event_id, self.inner.config.client_id.clone(), error);
        self.inner.state.lock().pending_acks.push(ack);
    }

    // ==================== Internals ====================

    fn set_status_locked(&self, s: &mut ManagerState, status: ConnectionStatus) {
        if s.status != status {
            s.status = status;
            s.health.status = status;
            let _ = self.inner.events_tx.send(ClientEvent::StatusChanged(status));
        }
    }

    fn teardown_locked(&self, s: &mut ManagerState) {
        if let Some(session) = s.session.take() {
            session.cancel.cancel();
        }
        if let Some((_, timer)) = s.reconnect_timer.take() {
            timer.cancel();
        }
        s.attempts = 0;
        s.epoch += 1;
        s.health = ConnectionHealth::default();
        self.set_status_locked(s, ConnectionStatus::Disconnected);
    }

    async fn try_connect(&self, epoch: u64) -> ClientResult<()> {
        let (token, last_event_id) = {
            let mut s = self.inner.state.lock();
            if s.epoch != epoch {
                return Ok(());
            }
            match &s.token {
                Some(token) => (token.clone(), s.last_event_id),
                None => {
                    self.teardown_locked(&mut s);
                    return Err(ClientError::TokenMissing);
                }
            }
        };

        let transport = match self.inner.connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(error = %e, "Dial failed");
                self.on_connect_failure(epoch);
                return Err(e);
            }
        };

        let req = SubscribeRequest {
            client_id: self.inner.config.client_id.clone(),
            role: self.inner.config.role,
            station: self.inner.config.station,
            user_id: self.inner.config.user_id.clone(),
            token,
            last_event_id,
            protocol_version: PROTOCOL_VERSION,
        };
        if let Err(e) = write_client_frame(transport.as_ref(), &ClientFrame::Subscribe(req)).await {
            self.on_connect_failure(epoch);
            return Err(e);
        }

        match read_server_frame(transport.as_ref()).await {
            Ok(ServerFrame::SubscribeOk(ok)) => {
                let cancel = CancellationToken::new();
                {
                    let mut s = self.inner.state.lock();
                    if s.epoch != epoch {
                        // Superseded by a disconnect() or a newer connect
                        return Ok(());
                    }
                    s.session = Some(SessionHandle {
                        cancel: cancel.clone(),
                        transport: transport.clone(),
                    });
                    s.attempts = 0;
                    s.health.reconnect_attempts = 0;
                    self.set_status_locked(&mut s, ConnectionStatus::Connected);
                }
                tracing::info!(
                    client_id = %self.inner.config.client_id,
                    resync = ok.resync_required,
                    "Connected to hub"
                );
                if ok.resync_required {
                    let _ = self.inner.events_tx.send(ClientEvent::ResyncRequired);
                }
                self.spawn_read_loop(epoch, transport, cancel);
                Ok(())
            }
            Ok(ServerFrame::Close(close)) => {
                // Rejected at handshake: fail fast, no reconnect loop
                tracing::warn!(reason = %close.reason, "Subscribe rejected");
                let mut s = self.inner.state.lock();
                if s.epoch == epoch {
                    self.teardown_locked(&mut s);
                }
                Err(ClientError::Rejected(close.reason))
            }
            Ok(other) => {
                self.on_connect_failure(epoch);
                Err(ClientError::Protocol(format!(
                    "Expected SubscribeOk, got {:?}",
                    other.frame_type()
                )))
            }
            Err(e) => {
                self.on_connect_failure(epoch);
                Err(e)
            }
        }
    }

    fn on_connect_failure(&self, epoch: u64) {
        let mut s = self.inner.state.lock();
        if s.epoch != epoch {
            return;
        }
        s.session = None;
        self.set_status_locked(&mut s, ConnectionStatus::Error);
        self.schedule_reconnect_locked(&mut s);
    }

    /// Schedule the next attempt, or settle disconnected
    ///
    /// Attempts increments before the timer is scheduled; token presence is
    /// re-checked when the timer fires.
    fn schedule_reconnect_locked(&self, s: &mut ManagerState) {
        if !self.inner.config.auto_reconnect
            || s.token.is_none()
            || s.attempts >= self.inner.config.max_reconnect_attempts
        {
            if s.attempts >= self.inner.config.max_reconnect_attempts {
                tracing::warn!(
                    attempts = s.attempts,
                    "Reconnect attempts exhausted, settling disconnected"
                );
            }
            s.attempts = 0;
            s.reconnect_timer = None;
            self.set_status_locked(s, ConnectionStatus::Disconnected);
            return;
        }

        s.attempts += 1;
        s.health.reconnect_attempts = s.attempts;
        let delay = backoff_delay(
            self.inner.config.backoff_base,
            self.inner.config.backoff_cap,
            s.attempts,
        );

        s.timer_gen += 1;
        let generation = s.timer_gen;
        let timer = CancellationToken::new();
        s.reconnect_timer = Some((generation, timer.clone()));

        tracing::info!(
            attempt = s.attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    manager.fire_reconnect_timer(generation).await;
                }
            }
        });
    }

    async fn fire_reconnect_timer(&self, generation: u64) {
        let epoch = {
            let mut s = self.inner.state.lock();
            let current = matches!(&s.reconnect_timer, Some((active, _)) if *active == generation);
            if !current {
                return; // cancelled or superseded
            }
            s.reconnect_timer = None;
            // Token may have been revoked while we slept
            if s.token.is_none() {
                s.attempts = 0;
                self.set_status_locked(&mut s, ConnectionStatus::Disconnected);
                return;
            }
            s.epoch += 1;
            self.set_status_locked(&mut s, ConnectionStatus::Connecting);
            s.epoch
        };

        let _ = self.try_connect(epoch).await;
    }

    fn spawn_read_loop(
        &self,
        epoch: u64,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    read = read_server_frame(transport.as_ref()) => {
                        match read {
                            Ok(frame) => {
                                if manager.handle_server_frame(epoch, transport.as_ref(), frame).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                if !cancel.is_cancelled() {
                                    manager.on_transport_error(epoch, &e);
                                }
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Returns true when the session is over
    async fn handle_server_frame(
        &self,
        epoch: u64,
        transport: &dyn Transport,
        frame: ServerFrame,
    ) -> bool {
        match frame {
            ServerFrame::Event(event) => {
                self.handle_event(epoch, transport, event).await;
                false
            }
            ServerFrame::Ping(ping) => {
                self.handle_ping(epoch, transport, ping).await;
                false
            }
            ServerFrame::Close(close) => {
                self.handle_close(epoch, &close);
                true
            }
            ServerFrame::SubscribeOk(_) => false,
        }
    }

    async fn handle_event(&self, epoch: u64, transport: &dyn Transport, event: Event) {
        {
            let mut s = self.inner.state.lock();
            if s.epoch != epoch {
                return;
            }
            // Redeliveries may arrive out of order; the cursor only advances
            if event.id > s.last_event_id.unwrap_or(0) {
                s.last_event_id = Some(event.id);
            }
            s.health.last_event_at = Some(chrono::Utc::now().timestamp_millis());
        }

        if event.acknowledgment_required {
            let ack = AckRequest::received(event.id, self.inner.config.client_id.clone());
            if let Err(e) = write_client_frame(transport, &ClientFrame::Ack(ack)).await {
                tracing::warn!(event_id = event.id, error = %e, "Failed to send ack");
            }
        }

        // Re-apply the same predicate the hub used on fan-out
        let config = &self.inner.config;
        if should_receive(
            config.station,
            &event.kind,
            &event.payload,
            config.user_id.as_deref(),
        ) {
            let _ = self.inner.events_tx.send(ClientEvent::Event(event));
        } else {
            tracing::debug!(kind = %event.kind, "Replayed event filtered out client-side");
        }
    }

    async fn handle_ping(&self, epoch: u64, transport: &dyn Transport, ping: PingPayload) {
        let acks = {
            let mut s = self.inner.state.lock();
            if s.epoch != epoch {
                return;
            }
            // Adopt the server-measured round trip for this connection
            s.health.record_latency(ping.health.latency_ms);

            let mut acks: Vec<AckRequest> = s.pending_acks.drain(..).collect();
            // The server is still waiting on these; if we have seen them,
            // the original ack was lost; repeat it (idempotent).
            let seen = s.last_event_id.unwrap_or(0);
            for event_id in &ping.pending_acks {
                if *event_id <= seen {
                    acks.push(AckRequest::received(
                        *event_id,
                        self.inner.config.client_id.clone(),
                    ));
                }
            }
            acks
        };

        let pong = ClientFrame::Pong(shared::wire::PongPayload {
            echo_sent_at: ping.sent_at,
            acks,
        });
        if let Err(e) = write_client_frame(transport, &pong).await {
            tracing::warn!(error = %e, "Failed to send pong");
        }
    }

    fn handle_close(&self, epoch: u64, close: &ClosePayload) {
        tracing::warn!(code = %close.code, reason = %close.reason, "Server closed the session");
        let mut s = self.inner.state.lock();
        if s.epoch != epoch {
            return;
        }
        // A deliberate close (token revoked, protocol) is fatal for the
        // session: no automatic retry
        self.teardown_locked(&mut s);
    }

    fn on_transport_error(&self, epoch: u64, error: &ClientError) {
        let mut s = self.inner.state.lock();
        if s.epoch != epoch {
            return;
        }
        tracing::warn!(error = %error, "Transport error, stream closed");
        s.session = None;
        self.set_status_locked(&mut s, ConnectionStatus::Error);
        self.schedule_reconnect_locked(&mut s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, memory_duplex};
    use async_trait::async_trait;
    use serde_json::json;
    use shared::wire::{FrameType, SubscribeOkPayload};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay_formula() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        let delays: Vec<Duration> = (1..=7).map(|k| backoff_delay(base, cap, k)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
        // Monotonically non-decreasing
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    /// Hands out pre-built memory transports; counts dials
    struct ScriptedConnector {
        peers: Mutex<Vec<Arc<MemoryTransport>>>,
        dials: AtomicU32,
    }

    impl ScriptedConnector {
        fn new(peers: Vec<Arc<MemoryTransport>>) -> Self {
            Self {
                peers: Mutex::new(peers),
                dials: AtomicU32::new(0),
            }
        }

        fn empty() -> Self {
            Self::new(Vec::new())
        }

        fn dial_count(&self) -> u32 {
            self.dials.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> ClientResult<Arc<dyn Transport>> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let mut peers = self.peers.lock();
            match peers.pop() {
                Some(t) => {
                    let transport: Arc<dyn Transport> = t;
                    Ok(transport)
                }
                None => Err(ClientError::Connection("Connection refused".into())),
            }
        }
    }

    fn manager_with(connector: Arc<ScriptedConnector>) -> ConnectionManager {
        let config = ConnectionConfig::new("c1", Role::Waiter, Station::Waiter);
        ConnectionManager::new(config, connector)
    }

    /// Answer the handshake on the peer end with SubscribeOk
    async fn accept_handshake(peer: &MemoryTransport, resync: bool) -> SubscribeRequest {
        let (frame_type, body) = peer.read_frame().await.unwrap();
        assert_eq!(frame_type, FrameType::Subscribe);
        let req = match ClientFrame::from_parts(frame_type, &body).unwrap() {
            ClientFrame::Subscribe(req) => req,
            other => panic!("expected subscribe, got {:?}", other),
        };
        let ok = ServerFrame::SubscribeOk(SubscribeOkPayload {
            resync_required: resync,
            last_event_id: 0,
        });
        peer.write_frame(ok.frame_type(), &ok.to_body().unwrap())
            .await
            .unwrap();
        req
    }

    #[tokio::test]
    async fn test_connect_without_token_never_dials() {
        let connector = Arc::new(ScriptedConnector::empty());
        let manager = manager_with(connector.clone());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::TokenMissing));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(connector.dial_count(), 0);
        assert_eq!(manager.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_connect_and_receive_event() {
        let (client_end, peer) = memory_duplex();
        let connector = Arc::new(ScriptedConnector::new(vec![Arc::new(client_end)]));
        let manager = manager_with(connector);
        manager.on_token_changed(Some("tok".into()));
        let mut events = manager.subscribe_events();

        let peer = Arc::new(peer);
        let accept = {
            let peer = peer.clone();
            tokio::spawn(async move { accept_handshake(&peer, false).await })
        };
        manager.connect().await.unwrap();
        let req = accept.await.unwrap();
        assert_eq!(req.token, "tok");
        assert_eq!(manager.status(), ConnectionStatus::Connected);

        // Push an event from the peer
        let mut event = Event::new("order:created", json!({"orderId": "o1"}));
        event.id = 7;
        let frame = ServerFrame::Event(event);
        peer.write_frame(frame.frame_type(), &frame.to_body().unwrap())
            .await
            .unwrap();

        loop {
            match events.recv().await.unwrap() {
                ClientEvent::Event(e) => {
                    assert_eq!(e.id, 7);
                    break;
                }
                ClientEvent::StatusChanged(_) => continue,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(manager.last_event_id(), Some(7));
    }

    #[tokio::test]
    async fn test_ack_required_event_acked_immediately() {
        let (client_end, peer) = memory_duplex();
        let connector = Arc::new(ScriptedConnector::new(vec![Arc::new(client_end)]));
        let manager = manager_with(connector);
        manager.on_token_changed(Some("tok".into()));

        let peer = Arc::new(peer);
        let accept = {
            let peer = peer.clone();
            tokio::spawn(async move { accept_handshake(&peer, false).await })
        };
        manager.connect().await.unwrap();
        accept.await.unwrap();

        let mut event = Event::new("order:esaurito:resolved", json!({})).require_ack();
        event.id = 3;
        let frame = ServerFrame::Event(event);
        peer.write_frame(frame.frame_type(), &frame.to_body().unwrap())
            .await
            .unwrap();

        let (frame_type, body) = peer.read_frame().await.unwrap();
        match ClientFrame::from_parts(frame_type, &body).unwrap() {
            ClientFrame::Ack(ack) => {
                assert_eq!(ack.event_id, 3);
                assert_eq!(ack.status, shared::ack::AckStatus::Received);
            }
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong_and_pending_acks() {
        let (client_end, peer) = memory_duplex();
        let connector = Arc::new(ScriptedConnector::new(vec![Arc::new(client_end)]));
        let manager = manager_with(connector);
        manager.on_token_changed(Some("tok".into()));

        let peer = Arc::new(peer);
        let accept = {
            let peer = peer.clone();
            tokio::spawn(async move { accept_handshake(&peer, false).await })
        };
        manager.connect().await.unwrap();
        accept.await.unwrap();

        manager.ack_processed(9);

        let ping = ServerFrame::Ping(PingPayload {
            sent_at: 123456,
            health: ConnectionHealth {
                latency_ms: 42,
                ..Default::default()
            },
            pending_acks: vec![],
        });
        peer.write_frame(ping.frame_type(), &ping.to_body().unwrap())
            .await
            .unwrap();

        let (frame_type, body) = peer.read_frame().await.unwrap();
        match ClientFrame::from_parts(frame_type, &body).unwrap() {
            ClientFrame::Pong(pong) => {
                assert_eq!(pong.echo_sent_at, 123456);
                assert_eq!(pong.acks.len(), 1);
                assert_eq!(pong.acks[0].event_id, 9);
            }
            other => panic!("expected pong, got {:?}", other),
        }
        // Server-measured latency adopted
        assert_eq!(manager.health().latency_ms, 42);
    }

    #[tokio::test]
    async fn test_resync_required_surfaced() {
        let (client_end, peer) = memory_duplex();
        let connector = Arc::new(ScriptedConnector::new(vec![Arc::new(client_end)]));
        let manager = manager_with(connector);
        manager.on_token_changed(Some("tok".into()));
        let mut events = manager.subscribe_events();

        let peer = Arc::new(peer);
        let accept = {
            let peer = peer.clone();
            tokio::spawn(async move { accept_handshake(&peer, true).await })
        };
        manager.connect().await.unwrap();
        accept.await.unwrap();

        loop {
            match events.recv().await.unwrap() {
                ClientEvent::ResyncRequired => break,
                ClientEvent::StatusChanged(_) => continue,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_failure_schedules_backoff_then_reconnects() {
        let (client_end, peer) = memory_duplex();
        // First dial fails (empty pop), second succeeds: stack order
        let connector = Arc::new(ScriptedConnector::new(vec![Arc::new(client_end)]));
        // Drain the one peer so the FIRST dial fails, then push it back
        let first = connector.peers.lock().pop().unwrap();
        let manager = manager_with(connector.clone());
        manager.on_token_changed(Some("tok".into()));

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.status(), ConnectionStatus::Error);
        assert_eq!(manager.reconnect_attempts(), 1);
        assert_eq!(manager.pending_timers(), 1);

        // Make the retry succeed
        connector.peers.lock().push(first);
        let peer = Arc::new(peer);
        let accept = {
            let peer = peer.clone();
            tokio::spawn(async move { accept_handshake(&peer, false).await })
        };

        // Paused clock: sleep(1s) in the timer task auto-advances
        accept.await.unwrap();
        for _ in 0..50 {
            if manager.status() == ConnectionStatus::Connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(connector.dial_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_lost_during_backoff_settles_disconnected() {
        let connector = Arc::new(ScriptedConnector::empty());
        let manager = manager_with(connector.clone());
        manager.on_token_changed(Some("tok".into()));

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.pending_timers(), 1);
        let dials_before = connector.dial_count();

        manager.on_token_changed(None);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.pending_timers(), 0);

        // Let any stray timer fire: no new dial may happen without a token
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.dial_count(), dials_before);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted_settles_disconnected() {
        let connector = Arc::new(ScriptedConnector::empty());
        let config = ConnectionConfig {
            max_reconnect_attempts: 2,
            backoff_base: Duration::from_millis(10),
            ..ConnectionConfig::new("c1", Role::Waiter, Station::Waiter)
        };
        let manager = ConnectionManager::new(config, connector.clone());
        manager.on_token_changed(Some("tok".into()));

        assert!(manager.connect().await.is_err());
        // Two scheduled retries fire and fail, then the machine settles
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.pending_timers(), 0);
        assert_eq!(manager.reconnect_attempts(), 0);
        // Initial dial + 2 retries
        assert_eq!(connector.dial_count(), 3);

        // No further attempts until an external connect()
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.dial_count(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_idempotent() {
        let connector = Arc::new(ScriptedConnector::empty());
        let manager = manager_with(connector);
        manager.on_token_changed(Some("tok".into()));

        let _ = manager.connect().await;
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.pending_timers(), 0);

        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.pending_timers(), 0);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_handshake_rejection_does_not_retry() {
        let (client_end, peer) = memory_duplex();
        let connector = Arc::new(ScriptedConnector::new(vec![Arc::new(client_end)]));
        let manager = manager_with(connector.clone());
        manager.on_token_changed(Some("bad".into()));

        let peer = Arc::new(peer);
        let reject = {
            let peer = peer.clone();
            tokio::spawn(async move {
                let _ = peer.read_frame().await.unwrap();
                let close = ServerFrame::Close(ClosePayload {
                    code: shared::error::ErrorCode::TokenInvalid,
                    reason: "Invalid token".into(),
                });
                peer.write_frame(close.frame_type(), &close.to_body().unwrap())
                    .await
                    .unwrap();
            })
        };

        let err = manager.connect().await.unwrap_err();
        reject.await.unwrap();
        assert!(matches!(err, ClientError::Rejected(_)));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        // Fail fast: no retry loop against a rejected credential
        assert_eq!(manager.pending_timers(), 0);
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_foreground_signal_reconnects_when_idle() {
        let (client_end, peer) = memory_duplex();
        let connector = Arc::new(ScriptedConnector::new(vec![Arc::new(client_end)]));
        let manager = manager_with(connector.clone());

        // No token: foreground is a no-op
        manager.on_foreground().await;
        assert_eq!(connector.dial_count(), 0);

        manager.on_token_changed(Some("tok".into()));
        let peer = Arc::new(peer);
        let accept = {
            let peer = peer.clone();
            tokio::spawn(async move { accept_handshake(&peer, false).await })
        };
        manager.on_foreground().await;
        accept.await.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Connected);

        // Already connected: another signal does not dial again
        manager.on_foreground().await;
        assert_eq!(connector.dial_count(), 1);
    }
}
