//! storesync agent
//!
//! Runs next to the content system: bootstraps its accounts, then keeps a
//! small HTTP API open for health reporting and on-demand seed runs.
//!
//! Usage:
//!   storesync-relay --config storesync.toml --http-port 4002

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use storesync_relay::{Agent, build_router};
use storesync_sync::{RemoteConfig, SyncConfig};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "storesync-relay")]
#[command(about = "Commerce to content sync agent")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "STORESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Content system base URL (overrides the config file)
    #[arg(long, env = "STORESYNC_CONTENT_URL")]
    content_url: Option<String>,

    /// Commerce system base URL (overrides the config file)
    #[arg(long, env = "STORESYNC_COMMERCE_URL")]
    commerce_url: Option<String>,

    /// Shared secret for signed signals
    #[arg(long, env = "STORESYNC_SIGNAL_SECRET", hide_env_values = true)]
    signal_secret: Option<String>,

    /// Administrator password
    #[arg(long, env = "STORESYNC_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Service account password
    #[arg(long, env = "STORESYNC_SERVICE_PASSWORD", hide_env_values = true)]
    service_password: Option<String>,

    /// Ask the content system for a full seed once startup completes
    #[arg(long)]
    sync_on_startup: bool,

    /// HTTP API port
    #[arg(long, default_value = "4002")]
    http_port: u16,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    if let Some(url) = &args.content_url {
        let namespace = config.remote.namespace.clone();
        config.remote = RemoteConfig::from_url(url).context("Invalid content URL")?;
        config.remote.namespace = namespace;
    }
    if let Some(url) = &args.commerce_url {
        config.commerce_url = url.clone();
    }
    if let Some(secret) = &args.signal_secret {
        config.signal_secret = secret.clone();
    }
    if let Some(password) = &args.admin_password {
        config.admin.secret = password.clone();
    }
    if let Some(password) = &args.service_password {
        config.service.secret = password.clone();
    }
    config.sync_on_startup |= args.sync_on_startup;
    config.retry = config
        .retry
        .with_env_overrides(|key| std::env::var(key).ok());

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(&args)?;
    if config.signal_secret.is_empty() {
        warn!("no signal secret configured, seed signals will be rejected by the commerce side");
    }
    info!(
        content = %config.remote.base_url(),
        commerce = %config.commerce_url,
        "storesync agent starting"
    );

    let agent = Agent::from_config(&config).context("Failed to build sync engine")?;

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.http_port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", args.http_port))?;
    let app = build_router(agent.state());
    let server = tokio::spawn(async move { axum::serve(listener, app).await });
    info!(port = args.http_port, "HTTP API listening");

    let report = agent
        .startup
        .run()
        .await
        .context("Content system bootstrap failed")?;
    info!(
        admin_registered = report.admin_registered,
        seed_requested = report.seed_requested,
        "startup complete"
    );

    server
        .await
        .context("HTTP server task failed")?
        .context("HTTP server failed")?;
    Ok(())
}
