//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, coupons, health, payments, subscriptions, usage, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for usage endpoints.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/plans` - Plan catalog
///
/// ## User (JWT auth)
/// - `POST /v1/accounts`, `GET /v1/accounts/me`
/// - `GET /v1/balance`, `GET /v1/transactions`
/// - `POST /v1/payments/intents`, `GET /v1/payments/intents/{intent_id}`
/// - `POST /v1/coupons/validate`
/// - `POST /v1/subscriptions/auto-renew`
///
/// ## Usage (Service API Key auth)
/// - `POST /v1/usage/reserve`, `POST /v1/usage/refund`, `POST /v1/usage/check`
///
/// ## Admin (Admin key)
/// - `POST /v1/admin/coupons`, `POST /v1/admin/coupons/{code}/deactivate`
/// - `POST /v1/admin/renew`
/// - `GET /v1/admin/reconciliation-gaps`, `POST /v1/admin/reconciliation-gaps/{intent_id}/retry`
/// - `GET /v1/admin/intents/pending`, `POST /v1/admin/intents/{intent_id}/fail`
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/payments`
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/reserve", post(usage::reserve))
        .route("/refund", post(usage::refund))
        .route("/check", post(usage::check))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/coupons", post(admin::create_coupon))
        .route("/coupons/:code/deactivate", post(admin::deactivate_coupon))
        .route("/renew", post(admin::run_renewals))
        .route("/reconciliation-gaps", get(admin::list_gaps))
        .route(
            "/reconciliation-gaps/:intent_id/retry",
            post(admin::retry_gap),
        )
        .route("/intents/pending", get(admin::list_pending_intents))
        .route("/intents/:intent_id/fail", post(admin::fail_intent));

    let api_routes = Router::new()
        .route("/plans", get(subscriptions::list_plans))
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        .route("/balance", get(accounts::get_balance))
        .route("/transactions", get(accounts::list_transactions))
        .route("/payments/intents", post(payments::create_intent))
        .route("/payments/intents/:intent_id", get(payments::get_intent))
        .route("/coupons/validate", post(coupons::validate_coupon))
        .route("/subscriptions/auto-renew", post(subscriptions::set_auto_renew))
        .nest("/admin", admin_routes)
        .nest("/usage", usage_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Gateway retries on its own schedule; not concurrency limited.
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
