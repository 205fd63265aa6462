//! Gambero hub server
//!
//! Real-time event distribution for station clients: event bus with
//! per-subscriber queues, replay on reconnect, acknowledgment tracking,
//! heartbeat health, plus the out-of-stock order workflow that rides the
//! channel.

pub mod common;
pub mod esaurito;
pub mod hub;
pub mod routes;
pub mod server;
pub mod transport;

pub use common::{AppError, AppResult};
pub use hub::{EmitOptions, EventHub, HubConfig};
pub use server::{Config, Server, ServerState};

/// Environment setup: dotenv + logging
pub fn setup_environment() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    let level = if config.is_production() { "info" } else { "debug" };
    let log_dir = format!("{}/logs", config.work_dir);
    common::init_logger_with_file(level, config.is_production(), Some(&log_dir))?;

    Ok(())
}

/// Startup banner
pub fn print_banner() {
    let config = Config::from_env();
    println!();
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            🦐 Gambero Hub Server                      ║");
    println!("╠══════════════════════════════════════════════════════╣");
    println!("║ 🌐 HTTP Listener   : 0.0.0.0:{:<24} ║", config.http_port);
    println!("║ 📨 Stream Listener : 0.0.0.0:{:<24} ║", config.stream_tcp_port);
    println!("║ 🏷  Environment     : {:<32} ║", config.environment);
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}
