// =============================================================================
// CoinDuel Client — Main Entry Point
// =============================================================================
//
// Connects to the game server and plays from the terminal. With a replay CSV
// configured it instead ingests the file offline and exits.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod command;
mod controller;
mod leaderboard;
mod market_data;
mod protocol;
mod render;
mod runtime_config;
mod session;
mod transport;
mod types;

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::command::HELP;
use crate::controller::Controller;
use crate::render::{LogSink, SeriesSink};
use crate::runtime_config::ClientConfig;

const CONFIG_PATH: &str = "coinduel_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("CoinDuel client starting");

    let mut config = if Path::new(CONFIG_PATH).exists() {
        ClientConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            ClientConfig::default()
        })
    } else {
        let config = ClientConfig::default();
        if let Err(e) = config.save(CONFIG_PATH) {
            warn!(error = %e, "Failed to write default config");
        }
        config
    };
    config.apply_env();

    let sink: Arc<dyn SeriesSink> = Arc::new(LogSink);

    // ── 2. Offline replay ────────────────────────────────────────────────
    if let Some(path) = config.replay_csv.clone() {
        let kept = controller::replay_csv(&path, &config, sink)?;
        info!(path = %path.display(), kept, "replay done");
        return Ok(());
    }

    // ── 3. Connect & play ────────────────────────────────────────────────
    info!(server = %config.server_url, nickname = %config.nickname, "connecting");
    let controller = match Controller::connect(config, sink).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "could not reach the game server");
            return Err(e);
        }
    };
    println!("{HELP}");

    let commands = controller::spawn_stdin_reader();
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let reason = controller.run(commands, interrupt).await?;
    info!(?reason, "CoinDuel client stopped");
    Ok(())
}
