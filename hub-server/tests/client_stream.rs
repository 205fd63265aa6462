//! End-to-end: station client against a live hub over TCP

use std::sync::Arc;
use std::time::Duration;

use gambero_client::{
    ClientEvent, ConnectionConfig, ConnectionManager, ConnectionStatus, TcpConnector,
};
use hub_server::hub::{EmitOptions, EventHub, HubConfig};
use hub_server::server::StaticTokenValidator;
use hub_server::transport::TcpServer;
use serde_json::json;
use shared::station::{Role, Station};

async fn start_hub(config: HubConfig) -> (EventHub, String) {
    let hub = EventHub::from_config(config);
    // Random port to avoid conflicts between parallel tests
    let port = 10000 + (rand::random::<u16>() % 20000);
    let addr = format!("127.0.0.1:{}", port);

    let server = TcpServer::new(
        hub.clone(),
        Arc::new(StaticTokenValidator::single("tok")),
        addr.clone(),
    );
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    // Give the listener a moment to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    (hub, addr)
}

fn manager(addr: &str, client_id: &str) -> ConnectionManager {
    let config = ConnectionConfig::new(client_id, Role::Waiter, Station::Waiter);
    ConnectionManager::new(config, Arc::new(TcpConnector::new(addr)))
}

async fn recv_event_ids(
    events: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
    count: usize,
) -> Vec<u64> {
    let mut ids = Vec::new();
    while ids.len() < count {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let ClientEvent::Event(e) = event {
            ids.push(e.id);
        }
    }
    ids
}

#[tokio::test]
async fn test_live_delivery_order() {
    let (hub, addr) = start_hub(HubConfig::default()).await;
    let manager = manager(&addr, "waiter-1");
    manager.on_token_changed(Some("tok".into()));
    let mut events = manager.subscribe_events();

    manager.connect().await.unwrap();
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    for i in 0..5 {
        let _ = hub.emit("order:created", json!({"seq": i}), EmitOptions::default())
            .unwrap();
    }

    let ids = recv_event_ids(&mut events, 5).await;
    assert_eq!(ids.len(), 5);
    assert!(ids.windows(2).all(|w| w[0] <= w[1]));

    manager.disconnect();
}

#[tokio::test]
async fn test_reconnect_replays_missed_events() {
    let (hub, addr) = start_hub(HubConfig::default()).await;
    let manager = manager(&addr, "waiter-1");
    manager.on_token_changed(Some("tok".into()));
    let mut events = manager.subscribe_events();

    manager.connect().await.unwrap();
    let _ = hub.emit("order:created", json!({}), EmitOptions::default()).unwrap();
    let _ = hub.emit("order:created", json!({}), EmitOptions::default()).unwrap();
    let before = recv_event_ids(&mut events, 2).await;

    manager.disconnect();
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);

    // Missed while away
    let _ = hub.emit("order:created", json!({}), EmitOptions::default()).unwrap();
    let _ = hub.emit("order:created", json!({}), EmitOptions::default()).unwrap();

    manager.connect().await.unwrap();
    let after = recv_event_ids(&mut events, 2).await;

    // Replay + live: the whole observed sequence is non-decreasing with no
    // gaps relative to what the hub assigned
    let mut all = before;
    all.extend(&after);
    assert_eq!(all, vec![1, 2, 3, 4]);

    manager.disconnect();
}

#[tokio::test]
async fn test_invalid_token_closes_without_retry() {
    let (_hub, addr) = start_hub(HubConfig::default()).await;
    let manager = manager(&addr, "waiter-1");
    manager.on_token_changed(Some("wrong".into()));

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, gambero_client::ClientError::Rejected(_)));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert_eq!(manager.pending_timers(), 0);
}

#[tokio::test]
async fn test_station_routing_over_the_wire() {
    let (hub, addr) = start_hub(HubConfig::default()).await;

    let kitchen = ConnectionManager::new(
        ConnectionConfig::new("kitchen-1", Role::Cook, Station::Kitchen),
        Arc::new(TcpConnector::new(&addr)),
    );
    kitchen.on_token_changed(Some("tok".into()));
    let mut kitchen_events = kitchen.subscribe_events();
    kitchen.connect().await.unwrap();

    let bar = ConnectionManager::new(
        ConnectionConfig::new("bar-1", Role::Bartender, Station::Bar),
        Arc::new(TcpConnector::new(&addr)),
    );
    bar.on_token_changed(Some("tok".into()));
    let mut bar_events = bar.subscribe_events();
    bar.connect().await.unwrap();

    let _ = hub.emit(
        "order:created",
        json!({"destination": "kitchen"}),
        EmitOptions::default(),
    )
    .unwrap();
    let _ = hub.emit(
        "order:created",
        json!({"destination": "bar"}),
        EmitOptions::default(),
    )
    .unwrap();

    // Each station sees exactly its own destination
    let kitchen_ids = recv_event_ids(&mut kitchen_events, 1).await;
    let bar_ids = recv_event_ids(&mut bar_events, 1).await;
    assert_eq!(kitchen_ids, vec![1]);
    assert_eq!(bar_ids, vec![2]);

    kitchen.disconnect();
    bar.disconnect();
}

#[tokio::test]
async fn test_heartbeat_keeps_session_alive_and_measures() {
    let (hub, addr) = start_hub(HubConfig {
        max_missed_heartbeats: 2,
        ..Default::default()
    })
    .await;
    let manager = manager(&addr, "waiter-1");
    manager.on_token_changed(Some("tok".into()));
    manager.connect().await.unwrap();

    // Several heartbeat rounds; the client pongs and stays registered
    for _ in 0..4 {
        hub.heartbeat_tick();
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    assert_eq!(hub.connected_clients().len(), 1);

    // The client answered pongs, so the hub measured a round trip
    let subs = hub.connected_clients();
    assert_eq!(subs[0].client_id, "waiter-1");

    manager.disconnect();
    // The hub notices the closed stream and unregisters
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(hub.connected_clients().is_empty());
}

#[tokio::test]
async fn test_acked_event_settles_via_stream() {
    let (hub, addr) = start_hub(HubConfig::default()).await;
    let manager = manager(&addr, "waiter-1");
    manager.on_token_changed(Some("tok".into()));
    let mut events = manager.subscribe_events();
    manager.connect().await.unwrap();

    let id = hub
        .emit(
            "order:esaurito:resolved",
            json!({"orderId": "o1"}),
            EmitOptions {
                priority: gambero_client::EventPriority::High,
                acknowledgment_required: true,
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();

    let ids = recv_event_ids(&mut events, 1).await;
    assert_eq!(ids, vec![id]);

    // The client acks Received on delivery; the tracker settles
    let mut settled = false;
    for _ in 0..20 {
        if hub.ack_tracker().pending_ids("waiter-1").is_empty() {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(settled, "ack never reached the tracker");

    manager.disconnect();
}
