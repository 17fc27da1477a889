//! mergeway server entry point.
//!
//! Loads configuration, connects to GitHub, starts the web server and the
//! session sweeper, and handles graceful shutdown.

mod signals;
mod sweeper;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mergeway_core::config::AppConfig;
use mergeway_core::git::GitHubClient;
use mergeway_web::{GitHubConnector, WebServer};

use crate::sweeper::SessionSweeper;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// mergeway merge session server.
#[derive(Parser, Debug)]
#[command(
    name = "mergeway-server",
    version,
    about = "Resolve merge conflicts between two branches and publish the merge commit"
)]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the listen address from the config file.
    #[arg(long)]
    listen: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load and resolve configuration
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => AppConfig::default(),
    };
    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;

    // Initialize tracing
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.server.log_level.clone());

    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  mergeway server v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    match &args.config {
        Some(path) => info!("Config file   : {}", path.display()),
        None => info!("Config file   : (defaults)"),
    }
    info!("GitHub API    : {}", config.github.api_url);
    info!("Listen        : {}", config.server.listen);
    info!("Max files     : {}", config.limits.max_files);
    info!("Fetch permits : {}", config.limits.max_concurrent_fetches);
    info!("Session TTL   : {}s", config.limits.session_ttl_secs);
    info!("Log level     : {}", log_level);
    info!("========================================");

    // GitHub client
    let has_default_token = config.github.token.is_some();
    if !has_default_token {
        warn!(
            env = %config.github.token_env,
            "no default GitHub token; requests must carry their own bearer token"
        );
    }
    let client = GitHubClient::new(
        config.github.api_url.clone(),
        config.github.token.clone().unwrap_or_default(),
        &config.github.user_agent,
    )
    .context("failed to create GitHub client")?;
    let connector = Arc::new(GitHubConnector::new(client, has_default_token));

    // Web server
    let listen_addr = config.server.listen.clone();
    let sweep_period = SessionSweeper::period_for_ttl(config.limits.session_ttl_secs);
    let web_server = WebServer::new(config, connector);
    let sweeper = SessionSweeper::new(web_server.state(), sweep_period);

    // Create a shutdown notify for cooperative cancellation
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let sweeper_shutdown = shutdown.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_shutdown).await;
    });

    let server_shutdown = shutdown.clone();
    let serve = web_server.start(&listen_addr, async move {
        server_shutdown.notified().await;
    });
    tokio::pin!(serve);

    // Serve until a signal arrives, then drain in-flight requests
    let early_exit = tokio::select! {
        result = &mut serve => Some(result),
        _ = signals::wait_for_shutdown() => None,
    };
    let served = match early_exit {
        Some(result) => result,
        None => {
            info!("Shutdown signal received, stopping...");
            shutdown.notify_waiters();
            serve.await
        }
    };

    shutdown.notify_waiters();
    match tokio::time::timeout(std::time::Duration::from_secs(10), sweeper_handle).await {
        Ok(Ok(())) => info!("session sweeper stopped gracefully"),
        Ok(Err(e)) => warn!("session sweeper task error: {}", e),
        Err(_) => warn!("session sweeper did not stop within 10s, forcing shutdown"),
    }

    served.context("web server error")?;
    info!("mergeway server stopped.");
    Ok(())
}
