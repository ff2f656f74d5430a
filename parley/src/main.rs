mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use parley_core::{bootstrap::load_config, logging, Config};
use parley_sfu::{LocalEngine, LocalEngineConfig, RoomRegistry, SfuConfig};

use server::ParleyServer;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Parley voice room server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML/JSON config file
    #[arg(short, long, env = "PARLEY_CONFIG_PATH")]
    config: Option<String>,
}

fn engine_config(config: &Config) -> LocalEngineConfig {
    LocalEngineConfig {
        listen_ip: config.media.listen_ip,
        announced_ip: config.media.announced_ip,
        rtc_min_port: config.media.rtc_min_port,
        rtc_max_port: config.media.rtc_max_port,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Parley server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Start the media worker
    let engine = LocalEngine::new(engine_config(&config))
        .map_err(|e| anyhow::anyhow!("Failed to start media worker: {e}"))?;

    // 4. Room registry
    let registry = Arc::new(RoomRegistry::new(
        SfuConfig {
            max_rooms: config.room.max_rooms,
            max_participants: config.room.max_participants,
        },
        Arc::new(engine),
    ));

    // 5. Serve until shutdown
    ParleyServer::new(config, registry).start().await
}
