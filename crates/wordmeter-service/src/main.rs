//! Wordmeter Service - HTTP API for word quotas, credit and subscriptions.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wordmeter_service::{create_router, scheduler, AppState, ServiceConfig};
use wordmeter_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wordmeter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Wordmeter Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        currency = %config.currency,
        cycle_days = config.cycle_days,
        webhook_configured = config.webhook_secret.is_some(),
        jwt_configured = config.jwt_secret.is_some(),
        "Service configuration loaded"
    );

    let store = open_store(&config)?;
    let state = AppState::new(store, config.clone());

    if config.renewal_interval_seconds > 0 {
        scheduler::spawn(
            Arc::clone(&state.engine),
            Duration::from_secs(config.renewal_interval_seconds),
        );
        tracing::info!(
            interval_seconds = config.renewal_interval_seconds,
            "Renewal scheduler started"
        );
    }

    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(wordmeter_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(_config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::warn!("Built without rocksdb-backend - using in-memory store, state is lost on exit");
    Ok(Arc::new(wordmeter_store::MemoryStore::new()))
}
