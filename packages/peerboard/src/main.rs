use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{delete, get, post},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use presence::{InMemoryDirectory, PresenceDirectory};

mod cli;
mod config;
mod demo;
mod handlers;
mod metrics;
#[cfg(test)]
mod test_helpers;

use crate::config::{FileConfig, PeerboardConfig, PresenceConfig, Profile, ServerConfig};
use crate::metrics::ServerMetrics;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "peerboard")]
#[command(about = "Presence directory and peer-to-peer chat, whiteboard and calls")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.peerboard)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration preset (overrides `profile` in config.toml)
    #[arg(long, global = true, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the presence server in the foreground
    Serve(ServeArgs),

    /// List peers announced on a presence server
    Peers(PeersArgs),

    /// Run two in-process peers against a local presence server
    Demo(DemoArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on (overrides config, 0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Parser)]
struct PeersArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Leave this peer id out of the listing
    #[arg(long)]
    exclude: Option<String>,

    /// Presence server to query (overrides config)
    #[arg(long)]
    server: Option<String>,
}

#[derive(Parser)]
pub(crate) struct DemoArgs {
    /// Presence poll interval in milliseconds
    #[arg(long, default_value = "200")]
    pub poll_interval_ms: u64,

    /// Skip writing the whiteboard PNG
    #[arg(long)]
    pub no_export: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Announced peers
    pub directory: Arc<dyn PresenceDirectory>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(directory: Arc<dyn PresenceDirectory>) -> Self {
        Self {
            directory,
            metrics: Arc::new(ServerMetrics::new()),
        }
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "peerboard=debug,peer_session=debug,presence=debug,tower_http=debug,info"
    } else {
        "peerboard=info,peer_session=info,presence=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = PeerboardConfig::new(cli.data_dir.clone())?;
    let file_config: FileConfig = config::load_config(&config.data_dir, cli.profile.as_ref())
        .extract()
        .with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config.config_toml_path().display()
            )
        })?;

    match cli.command {
        Commands::Serve(args) => run_server(args, &file_config).await,
        Commands::Peers(args) => {
            let mut presence = PresenceConfig::from_file(&file_config.presence);
            if let Some(server) = args.server {
                presence.server_url = server;
            }
            cli::peers_command(&presence, args.exclude, args.json).await
        }
        Commands::Demo(args) => demo::run_demo(&config, &file_config, &args).await,
    }
}

/// Every route the presence server exposes.
pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/register", post(handlers::register_handler))
        .route(
            "/api/unregister/{peer_id}",
            delete(handlers::unregister_handler),
        )
        .route("/api/users", get(handlers::list_users_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/api/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the presence API on `listener` until `shutdown` is cancelled.
pub(crate) async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Server error")
}

async fn run_server(args: ServeArgs, file_config: &FileConfig) -> Result<()> {
    info!("Starting peerboard presence server");

    let mut server_config = ServerConfig::from_file(&file_config.server);
    if let Some(host) = args.host {
        server_config.host = host;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }

    let addr = server_config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;

    info!("peerboard listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  POST   /api/register            - Announce a peer");
    info!("  DELETE /api/unregister/:peer_id - Withdraw a peer");
    info!("  GET    /api/users               - List announced peers");
    info!("  GET    /api/health              - Liveness");
    info!("  GET    /api/metrics             - Counters");

    let state = AppState::new(Arc::new(InMemoryDirectory::new()));
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received shutdown signal, cleaning up...");
        signal.cancel();
    });

    let result = serve(listener, state, shutdown).await;
    info!("Shutdown complete");
    result
}
