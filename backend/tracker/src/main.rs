//! TruPath journey tracker — entry point.
//!
//! Rehydrates tracked journeys from the remote store and the local cache,
//! starts the progression scheduler and exposes a small Axum REST API for
//! the donor UI and the admin panel.

use std::sync::Arc;

use reqwest::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tracker::clock::SystemClock;
use tracker::config::Config;
use tracker::{api, service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // HTTP client for the rest backend.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // ─── Store, sync worker, scheduler ────────────────────
    let remote = service::connect_remote(&config, client).await?;
    let state = Arc::new(service::start(&config, remote, Arc::new(SystemClock)).await?);

    // The API is the long-lived consumer: keep the timer running while serving.
    let _lease = state.scheduler.attach();

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
