use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vybe_server::config::ServerConfig;
use vybe_server::db::pool::{create_pool, run_migrations};
use vybe_server::web::app_state::AppState;
use vybe_server::web::router::build_router;

/// How often stale rate-limit buckets are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "vybe-server", about = "Vybe Looproom real-time server")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "vybe.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let state = Arc::new(AppState::new(pool, &config));
    if state.auth_config.uses_dev_secret() {
        warn!("JWT_SECRET is not set; using the development secret");
    }

    let shutdown = CancellationToken::new();
    spawn_cleanup(state.clone(), shutdown.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.web_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.web_address))?;
    info!(address = %config.server.web_address, "Vybe server listening");

    let token = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutting down");
        token.cancel();
    })
    .await
    .context("server error")?;

    shutdown.cancel();
    Ok(())
}

/// Periodically drop rate-limit buckets nobody has touched recently.
fn spawn_cleanup(state: Arc<AppState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    state.limiters.cleanup(CLEANUP_INTERVAL);
                    state.http_limiters.cleanup(CLEANUP_INTERVAL);
                }
            }
        }
    });
}
