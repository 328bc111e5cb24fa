//! reef-server: WebSocket RPC server for the storyreef party game.
//!
//! Accepts player connections, routes their mutations into the room
//! registry, and streams room events and narrator audio back.

mod connection;
mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reef_agent::{LiveAgentApi, LiveConfig};
use reef_config::ReefConfig;
use reef_game::{EventLog, RoomRegistry, RoomSettings, StoryCatalog};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;

#[derive(Parser)]
#[command(name = "reef-server", about = "Voice party game server")]
struct Args {
    /// Config file path. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reef_server=info,reef_game=info,reef_agent=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let catalog = match load_catalog(&config) {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::error!(error = %e, "failed to load story catalog");
            std::process::exit(1);
        }
    };

    let mut live = LiveConfig::new(
        config.agent.api_key.clone(),
        config.agent.model.clone(),
        config.agent.voice.clone(),
    );
    live.connect_timeout = Duration::from_secs(config.agent.connect_timeout_secs);
    let api = Arc::new(LiveAgentApi::new(live));

    let log = Arc::new(EventLog::new(config.game.event_history_capacity));
    let settings = RoomSettings::from_config(
        &config.game,
        Duration::from_secs(config.agent.reconnect_backoff_secs),
    );
    let registry = Arc::new(RoomRegistry::new(log, catalog, api, settings));

    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("reef-server listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, registry).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

fn load_config(args: &Args) -> Result<ReefConfig, reef_common::ConfigError> {
    match &args.config {
        Some(path) => reef_config::load_from_path(path),
        None => reef_config::load_default(),
    }
}

fn load_catalog(config: &ReefConfig) -> Result<StoryCatalog, reef_common::ConfigError> {
    match &config.game.stories_path {
        Some(path) => StoryCatalog::from_toml_path(std::path::Path::new(path)),
        None => Ok(StoryCatalog::built_in()),
    }
}
