//! Daily Hue Daemon
//!
//! Serves the daily color challenge over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! daily-hue
//!
//! # Start with custom config
//! daily-hue --config /path/to/config.toml
//!
//! # Custom port and data directory
//! daily-hue --http-port 8096 --storage-dir /data/daily-hue
//! ```
//!
//! Log level follows `RUST_LOG` (default `daily_hue=info`).

use clap::Parser;
use daily_hue::services::LoggingEventListener;
use daily_hue::{ChallengeDb, Config, EventBus, HttpServer, Services};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "daily-hue")]
#[command(about = "Daily color-matching challenge server")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "DAILY_HUE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "DAILY_HUE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "DAILY_HUE_HTTP_PORT")]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("daily_hue=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config.validate()?;

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        base_attempts = config.base_attempts,
        max_attempts = config.max_attempts,
        "Starting daily-hue"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config.default_config_path());
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(ChallengeDb::open(&config.db_path(), config.busy_timeout())?);
    let events = Arc::new(EventBus::with_capacity(config.event_capacity));
    let _listener = events.spawn_listener(Arc::new(LoggingEventListener));

    let services = Arc::new(Services::new(db.clone(), config.rules(), events));

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(services, http_addr, config.leaderboard_limit));

    info!("HTTP API available at http://{}", http_addr);
    info!("Endpoints:");
    info!("  GET  /health                 - Health check");
    info!("  POST /v1/scores/submit       - Submit a guess");
    info!("  GET  /v1/scores/summary      - Day summary");
    info!("  GET  /v1/scores/history      - Attempt history");
    info!("  GET  /v1/leaderboard         - Day ranking");
    info!("  GET  /v1/leaderboard/rank    - Caller rank");
    info!("  POST /v1/admin/targets       - Publish target");
    info!("  POST /v1/admin/scores/reset  - Reset a user's day");
    info!("  POST /v1/admin/items/extra-attempts - Apply extra-attempt item");
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    if let Ok(stats) = db.stats() {
        info!(
            attempts = stats.attempt_count,
            leaderboard_entries = stats.leaderboard_count,
            settlements = stats.settlement_count,
            "Final challenge stats"
        );
    }

    Ok(())
}
