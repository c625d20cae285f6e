//! Parley server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley::api::{self, AppState};
use parley::config::AppConfig;
use parley::genai::OpenAiBackend;
use parley::session::SessionManager;
use parley::store::{ChatDb, ConversationStore};
use parley::ws::ConnectionHub;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Parley - conversational chat actor server."
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the SQLite database path.
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley=info,tower_http=info")),
        )
        .init();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.database.path = Some(database);
    }

    if config.genai.api_key.is_empty() {
        warn!("no generation API key configured; upstream calls will fail");
    }

    let db_path = config.database_path();
    info!(path = %db_path.display(), "opening chat database");
    let db = ChatDb::open(&db_path).await?;
    let store = ConversationStore::new(db.clone());

    let backend = Arc::new(OpenAiBackend::new(config.genai.clone())?);
    let hub = Arc::new(ConnectionHub::new());
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        hub.clone(),
        backend.clone(),
        Duration::from_secs(config.stream.fragment_timeout_secs),
    ));

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), store, hub, sessions, backend);

    let app = axum::Router::new().nest("/api", api::create_router(state));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
