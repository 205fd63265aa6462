//! Server state: the explicitly owned service graph
//!
//! Everything with a lifecycle hangs off this struct: hub, validator,
//! stores, workflow. No module-level singletons: tests and multi-instance
//! deployments each build their own state and tear it down via
//! [`ServerState::shutdown`].

use std::sync::Arc;
use std::time::Instant;

use crate::esaurito::{
    EsauritoService, InMemoryInventoryStore, InMemoryOrderStore, InventoryStore, OrderStore,
};
use crate::hub::{EventHub, HeartbeatService};
use crate::server::auth::{StaticTokenValidator, TokenValidator};
use crate::server::config::Config;
use crate::transport::TcpServer;

#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    hub: EventHub,
    validator: Arc<dyn TokenValidator>,
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryStore>,
    esaurito: Arc<EsauritoService>,
    started_at: Instant,
}

impl ServerState {
    /// Build the default service graph from config
    pub fn initialize(config: &Config) -> Self {
        let validator: Arc<dyn TokenValidator> =
            Arc::new(StaticTokenValidator::new(config.accepted_tokens.clone()));
        let orders: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
        let inventory: Arc<dyn InventoryStore> = Arc::new(InMemoryInventoryStore::new());
        Self::with_parts(config.clone(), validator, orders, inventory)
    }

    /// Build with injected collaborators (tests, embedded deployments)
    pub fn with_parts(
        config: Config,
        validator: Arc<dyn TokenValidator>,
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryStore>,
    ) -> Self {
        let hub = EventHub::from_config(config.hub_config());
        let esaurito = Arc::new(EsauritoService::new(
            orders.clone(),
            inventory.clone(),
            hub.clone(),
        ));

        Self {
            config,
            hub,
            validator,
            orders,
            inventory,
            esaurito,
            started_at: Instant::now(),
        }
    }

    /// Start long-running tasks: heartbeat loop + TCP push-stream server
    pub fn start_background_tasks(&self) {
        HeartbeatService::spawn(self.hub.clone(), self.hub.shutdown_token().clone());

        let tcp = TcpServer::new(
            self.hub.clone(),
            self.validator.clone(),
            format!("0.0.0.0:{}", self.config.stream_tcp_port),
        );
        tokio::spawn(async move {
            if let Err(e) = tcp.run().await {
                tracing::error!("Push stream TCP server error: {}", e);
            }
        });
    }

    /// Cancel every task hanging off the hub token
    pub fn shutdown(&self) {
        self.hub.shutdown();
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn validator(&self) -> &Arc<dyn TokenValidator> {
        &self.validator
    }

    pub fn esaurito(&self) -> &Arc<EsauritoService> {
        &self.esaurito
    }

    pub fn orders(&self) -> &Arc<dyn OrderStore> {
        &self.orders
    }

    pub fn inventory(&self) -> &Arc<dyn InventoryStore> {
        &self.inventory
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
