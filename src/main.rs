//! Runboard — backtest run metadata over HTTP.
//!
//! A thin query façade: the same two run retrievals served either straight
//! from the runs database or proxied through the upstream analytics query
//! endpoint, chosen once at startup from the environment.

mod api;
mod backtest_api;
mod middleware;
mod models;
mod runs;
mod store;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    backtest_api::BacktestApiClient, models::Config, runs::RunService, store::RunStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    let store = RunStore::open(&config.database_path)?;

    let backtest = config
        .backtest_api_base
        .as_deref()
        .map(|base| Arc::new(BacktestApiClient::new(base)));
    if let Some(client) = &backtest {
        info!("Backtest API enabled: {}", client.base_url());
    }

    let runs = Arc::new(RunService::new(Arc::new(store), backtest));
    let app = api::create_router(runs);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 Runboard API listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Initialize tracing with env-filter control
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runboard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
