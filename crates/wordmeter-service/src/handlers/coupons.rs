//! Coupon preview handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use wordmeter_core::Grant;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Coupon preview request.
#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    /// The code as the user typed it.
    pub code: String,
    /// The purchase it would apply to.
    pub grant: Grant,
}

/// Coupon preview response.
#[derive(Debug, Serialize)]
pub struct ValidateCouponResponse {
    /// Normalized code.
    pub code: String,
    /// List price.
    pub amount_cents: i64,
    /// Discount the coupon gives.
    pub discount_cents: i64,
    /// Price after the discount.
    pub final_amount_cents: i64,
}

/// Preview a coupon against a purchase. Consumes nothing.
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ValidateCouponRequest>,
) -> Result<Json<ValidateCouponResponse>, ApiError> {
    let amount_cents = state.engine.price(body.grant)?;
    let quote = state
        .engine
        .coupons()
        .validate(&body.code, body.grant.purpose(), amount_cents)?;

    tracing::debug!(
        account_id = %auth.account_id,
        code = %quote.code,
        discount_cents = quote.discount_cents,
        "Coupon previewed"
    );

    Ok(Json(ValidateCouponResponse {
        code: quote.code,
        amount_cents,
        discount_cents: quote.discount_cents,
        final_amount_cents: quote.final_amount_cents,
    }))
}
