//! termweb server binary.
//!
//! Starts the HTTP/WebSocket server, the idle reaper, and tears every
//! session down on Ctrl-C.

use clap::Parser as ClapParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use termweb::{
    api::{self, AppState},
    config::Config,
    reaper::Reaper,
    session::SessionRegistry,
};

/// termweb - terminal sessions over HTTP and WebSocket.
#[derive(ClapParser, Debug)]
#[command(name = "termweb", version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP/WebSocket server
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Path to a TOML config file
    #[arg(long, env = "TERMWEB_CONFIG")]
    config: Option<PathBuf>,

    /// Shell to spawn for new sessions (overrides $SHELL)
    #[arg(long)]
    shell: Option<String>,

    /// Seconds of inactivity before a session is evicted
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Seconds between idle sweeps
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long)]
    max_sessions: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "termweb=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?.ok_or_else(|| {
            anyhow::anyhow!("config file not found: {}", path.display())
        })?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind.to_string();
    }
    if let Some(shell) = cli.shell {
        config.default_shell = Some(shell);
    }
    if let Some(secs) = cli.idle_timeout {
        config.idle_timeout_secs = secs;
    }
    if let Some(secs) = cli.sweep_interval {
        config.sweep_interval_secs = secs;
    }
    if let Some(max) = cli.max_sessions {
        config.max_sessions = max;
    }

    let registry = SessionRegistry::with_max_sessions(config.max_sessions());
    let config = Arc::new(config);

    let reaper = Reaper::new(
        registry.clone(),
        config.idle_timeout(),
        config.sweep_interval(),
    );
    let reaper_task = tokio::spawn(reaper.run());

    let state = AppState {
        sessions: registry.clone(),
        config: config.clone(),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind.as_str()).await?;
    tracing::info!(bind = %config.bind, "termweb listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    reaper_task.abort();

    // Give draining children their grace period before the process exits.
    if let Some(escalation) = registry.drain() {
        let _ = escalation.await;
    }

    Ok(())
}
