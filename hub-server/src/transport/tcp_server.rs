//! TCP push-stream server
//!
//! Accepts connections and hands each one to a session. Shuts down when the
//! hub's cancellation token fires.

use std::sync::Arc;
use tokio::net::TcpListener;

use shared::error::{AppError, AppResult};

use crate::hub::{EventHub, session};
use crate::server::auth::TokenValidator;
use crate::transport::TcpTransport;

pub struct TcpServer {
    hub: EventHub,
    validator: Arc<dyn TokenValidator>,
    listen_addr: String,
}

impl TcpServer {
    pub fn new(hub: EventHub, validator: Arc<dyn TokenValidator>, listen_addr: String) -> Self {
        Self {
            hub,
            validator,
            listen_addr,
        }
    }

    /// Run the accept loop until shutdown
    pub async fn run(&self) -> AppResult<()> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind: {}", e)))?;

        tracing::info!("Push stream TCP server listening on {}", self.listen_addr);

        let shutdown_token = self.hub.shutdown_token().clone();

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    tracing::info!("Push stream TCP server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::info!("Client connected: {}", addr);

                            let hub = self.hub.clone();
                            let validator = self.validator.clone();
                            let shutdown = shutdown_token.clone();
                            let transport = Arc::new(TcpTransport::from_stream(stream));

                            tokio::spawn(async move {
                                session::serve_connection(hub, validator, transport, shutdown).await;
                                tracing::info!("Client session ended: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
