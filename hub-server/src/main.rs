use hub_server::{Config, Server, ServerState, print_banner, setup_environment};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Environment (dotenv, logging)
    setup_environment()?;

    print_banner();

    tracing::info!("🦐 Gambero hub server starting...");

    // 2. Load configuration
    let config = Config::from_env();

    // 3. Initialize server state
    let state = ServerState::initialize(&config);

    // 4. Run (starts heartbeat + stream server, then serves HTTP)
    let server = Server::with_state(config, state);

    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
