//! # lookout
//!
//! Lookout signaling server binary: loads settings, opens the database,
//! wires the store-backed collaborators into the signaling hub and serves
//! until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lookout_auth::TokenService;
use lookout_logging::{LoggingConfig, init_logging};
use lookout_settings::{LookoutSettings, load_settings, load_settings_from_path, lookout_home};
use lookout_store::Database;
use lookout_server::signaling::{Authorizer, TelemetrySink};
use lookout_server::{
    HubConfig, LookoutServer, ServerConfig, SignalingHub, StoreAuthorizer, StoreTelemetrySink,
    metrics, spawn_retention_task,
};
use tracing::{info, warn};

const RETENTION_SWEEP_EVERY: Duration = Duration::from_secs(6 * 60 * 60);

/// Lookout signaling server.
#[derive(Parser, Debug)]
#[command(name = "lookout", about = "Lookout signaling server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file (defaults to `~/.lookout/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn resolve_db_path(cli: &Cli, settings: &LookoutSettings) -> PathBuf {
    cli.db_path.clone().unwrap_or_else(|| {
        let configured = PathBuf::from(&settings.storage.db_path);
        if configured.is_absolute() {
            configured
        } else {
            lookout_home().join(configured)
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;

    let _ = init_logging(&LoggingConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
        ..LoggingConfig::default()
    });

    let metrics_handle = match metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let db_path = resolve_db_path(&cli, &settings);
    ensure_parent_dir(&db_path)?;
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    info!(path = %db_path.display(), "database opened");

    let tokens = TokenService::new(settings.auth.jwt_secret.as_bytes());
    let authorizer: Arc<dyn Authorizer> = Arc::new(StoreAuthorizer::new(
        db.clone(),
        tokens,
        chrono::Duration::days(settings.auth.broadcaster_token_days),
    ));
    let sink: Arc<dyn TelemetrySink> = Arc::new(StoreTelemetrySink::new(db.clone()));

    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let hub = Arc::new(SignalingHub::new(
        HubConfig::from(&config),
        authorizer,
        Some(sink),
    ));
    let mut handle = LookoutServer::new(config, hub, metrics_handle)
        .listen()
        .await
        .context("Failed to start server")?;

    handle.track(spawn_retention_task(
        db,
        settings.storage.retention_days,
        RETENTION_SWEEP_EVERY,
        handle.shutdown_token(),
    ));

    info!(port = handle.port(), "lookout ready");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("interrupt received");
    handle.shutdown().await;
    Ok(())
}
