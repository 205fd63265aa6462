pub mod auth;
mod config;
mod state;

use std::net::SocketAddr;

pub use auth::{AllowAllValidator, StaticTokenValidator, TokenValidator};
pub use config::Config;
pub use state::ServerState;

use shared::error::{AppError, AppResult};

use crate::routes::build_router;

pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state (for sharing with embedded clients)
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> AppResult<()> {
        // Create application state if not provided
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config),
        };

        // Heartbeat loop + push-stream TCP server
        state.start_background_tasks();

        let app = build_router(state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));

        tracing::info!("🚀 Starting HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

        let shutdown_state = state.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                shutdown_state.shutdown();
            })
            .await
            .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

        tracing::info!("✅ Server shutdown complete");
        Ok(())
    }
}

/// Graceful shutdown handler
///
/// Listens for SIGTERM (Kubernetes) and Ctrl+C signals
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
