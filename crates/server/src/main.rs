//! Standalone gridblast server (plain WebSocket, no embedded client).

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("gridblast server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Grid: {}x{} cells of {}", config.world.columns, config.world.rows, config.world.cell_size);
    info!("  Tick: {}ms", config.server.tick_interval_ms);

    // Start the game server
    server::run(config).await?;

    Ok(())
}
