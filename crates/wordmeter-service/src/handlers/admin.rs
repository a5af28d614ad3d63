//! Admin handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use wordmeter_core::{
    Coupon, CouponPurpose, DiscountType, IntentId, PaymentIntent, ReconciliationGap,
    SettlementOutcome,
};
use wordmeter_ledger::RenewalReport;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::{default_limit, MAX_PAGE};
use crate::state::AppState;

fn parse_intent(id: &str) -> Result<IntentId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid intent_id: {id}")))
}

/// Coupon creation request.
#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    /// Code users type in.
    pub code: String,
    /// Percentage or fixed amount.
    pub discount_type: DiscountType,
    /// Percent (0 to 100) or amount in cents.
    pub discount_value: i64,
    /// Total redemptions allowed.
    pub max_uses: u32,
    /// Purchases the coupon applies to.
    #[serde(default = "default_purpose")]
    pub applicable_purpose: CouponPurpose,
    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

const fn default_purpose() -> CouponPurpose {
    CouponPurpose::Both
}

/// Create a coupon.
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<CreateCouponRequest>,
) -> Result<Json<Coupon>, ApiError> {
    let coupon = Coupon::new(
        &body.code,
        body.discount_type,
        body.discount_value,
        body.max_uses,
        body.applicable_purpose,
        body.expires_at,
    )?;
    let coupon = state.engine.coupons().create(coupon)?;

    tracing::info!(admin_id = %admin.admin_id, code = %coupon.code, "Admin created coupon");

    Ok(Json(coupon))
}

/// Deactivate a coupon.
pub async fn deactivate_coupon(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<Coupon>, ApiError> {
    let coupon = state.engine.coupons().deactivate(&code)?;

    tracing::info!(admin_id = %admin.admin_id, code = %coupon.code, "Admin deactivated coupon");

    Ok(Json(coupon))
}

/// Renewal sweep request.
#[derive(Debug, Default, Deserialize)]
pub struct RenewRequest {
    /// Sweep as of this instant instead of now.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// Run the renewal sweep on demand.
pub async fn run_renewals(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    body: Option<Json<RenewRequest>>,
) -> Result<Json<RenewalReport>, ApiError> {
    let now = body.and_then(|Json(b)| b.as_of).unwrap_or_else(Utc::now);
    let report = state.engine.process_due(now)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        renewed = report.renewed,
        expired = report.expired,
        failed = report.failed,
        renewal_intents = report.renewal_intents.len(),
        "Admin ran renewal sweep"
    );

    Ok(Json(report))
}

/// List open reconciliation gaps.
pub async fn list_gaps(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> Result<Json<Vec<ReconciliationGap>>, ApiError> {
    Ok(Json(state.engine.reconciler().list_gaps()?))
}

/// Retry the ledger write for a gap.
pub async fn retry_gap(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(intent_id): Path<String>,
) -> Result<Json<SettlementOutcome>, ApiError> {
    let intent_id = parse_intent(&intent_id)?;
    let outcome = state.engine.reconciler().retry_gap(&intent_id)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        intent_id = %intent_id,
        outcome = ?outcome,
        "Admin retried reconciliation gap"
    );

    Ok(Json(outcome))
}

/// Mark-failed request.
#[derive(Debug, Deserialize)]
pub struct FailIntentRequest {
    /// Why the intent is abandoned.
    pub reason: String,
}

/// Mark a pending intent failed and release its coupon.
pub async fn fail_intent(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(intent_id): Path<String>,
    Json(body): Json<FailIntentRequest>,
) -> Result<Json<PaymentIntent>, ApiError> {
    let intent_id = parse_intent(&intent_id)?;
    let intent = state
        .engine
        .reconciler()
        .mark_failed(&intent_id, &body.reason)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        intent_id = %intent_id,
        "Admin failed payment intent"
    );

    Ok(Json(intent))
}

/// Pending intent query parameters.
#[derive(Debug, Deserialize)]
pub struct PendingIntentsQuery {
    /// Only intents at least this old.
    #[serde(default)]
    pub older_than_minutes: i64,
    /// Maximum results.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// List pending intents, for chasing abandoned checkouts.
pub async fn list_pending_intents(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<PendingIntentsQuery>,
) -> Result<Json<Vec<PaymentIntent>>, ApiError> {
    let intents = state.engine.reconciler().list_stale_intents(
        Duration::minutes(query.older_than_minutes.max(0)),
        query.limit.min(MAX_PAGE),
    )?;
    Ok(Json(intents))
}
