//! Application state.

use std::sync::Arc;

use chrono::Duration;
use wordmeter_ledger::{BillingEngine, EngineConfig};
use wordmeter_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ledger, coupons, subscriptions and reconciliation over one store.
    pub engine: Arc<BillingEngine>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let webhook_secret = config.webhook_secret.clone().unwrap_or_default();
        if webhook_secret.is_empty() {
            tracing::warn!("Webhook secret not configured - every settlement will be rejected");
        }

        let engine_config = EngineConfig {
            cycle_length: Duration::days(config.cycle_days.max(1)),
            webhook_secret,
            currency: config.currency.clone(),
            ..EngineConfig::default()
        };

        Self {
            engine: Arc::new(BillingEngine::new(store, engine_config)),
            config,
        }
    }
}
