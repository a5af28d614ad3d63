//! Checkout handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use wordmeter_core::{Grant, IntentId, PaymentIntent};
use wordmeter_ledger::CheckoutOutcome;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Checkout request.
#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    /// What is being bought.
    pub grant: Grant,
    /// Optional discount code.
    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// Start a purchase.
///
/// Returns a pending intent to pay at the gateway, or the applied grant when a
/// coupon covers the whole price.
pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateIntentRequest>,
) -> Result<Json<CheckoutOutcome>, ApiError> {
    let coupon_code = body
        .coupon_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let outcome = state
        .engine
        .checkout(&auth.account_id, body.grant, coupon_code)?;

    match &outcome {
        CheckoutOutcome::PaymentRequired { intent } => tracing::info!(
            account_id = %auth.account_id,
            intent_id = %intent.id,
            amount_cents = intent.amount_cents,
            "Payment intent created"
        ),
        CheckoutOutcome::Granted { coupon_code, .. } => tracing::info!(
            account_id = %auth.account_id,
            coupon_code = %coupon_code,
            "Purchase granted by coupon"
        ),
    }

    Ok(Json(outcome))
}

/// Get one of the current user's intents.
pub async fn get_intent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(intent_id): Path<String>,
) -> Result<Json<PaymentIntent>, ApiError> {
    let not_found = || ApiError::NotFound(format!("payment intent not found: {intent_id}"));
    let id: IntentId = intent_id.parse().map_err(|_| not_found())?;

    let intent = state.engine.reconciler().get_intent(&id)?;
    if intent.account_id != auth.account_id {
        return Err(not_found());
    }

    Ok(Json(intent))
}
