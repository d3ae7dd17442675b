//! Pondo API server entry point.
//!
//! Serves the shared funds document publicly and accepts whole-document
//! replacements from admins holding a live session token. A background task
//! sweeps expired sessions and idle rate-limit records.

mod api;
mod config;
mod errors;
mod funds;
mod rate_limit;
mod session;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use rate_limit::RateLimiter;
use session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load optional .env file (ignored if missing). Before logging, so a
    // RUST_LOG set there takes effect.
    let _ = dotenvy::dotenv();

    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!("Loaded configuration: {config:?}");

    // HTTP client for the remote store; its timeout bounds every GitHub call.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let store = store::from_config(&config.storage, client);
    info!("Funds stored in {}", store.describe());

    // Touch the store once so a missing document is seeded before traffic.
    if let Err(e) = store.read().await {
        warn!("Funds store not ready at startup: {e}");
    }

    let sessions = Arc::new(SessionManager::new(config.session_timeout));
    let limiter = Arc::new(RateLimiter::new(
        config.login_window,
        config.login_max_attempts,
    ));

    // ─── Background sweeper ───────────────────────────────
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(session::run_sweeper(
        sessions.clone(),
        limiter.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        store,
        sessions,
        limiter,
        admin_key: config.admin_key.clone(),
        trust_proxy: config.trust_proxy,
    });
    let app = api::router(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    sweeper.await?;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {e}");
                // Never resolve; keep serving.
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
