//! Plan catalog and subscription settings.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use wordmeter_core::{PlanLimits, PlanTier};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::accounts::AccountResponse;
use crate::state::AppState;

/// One catalog entry.
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    /// Tier.
    pub tier: PlanTier,
    /// Limits and price.
    #[serde(flatten)]
    pub limits: PlanLimits,
}

/// List the tiers on offer.
pub async fn list_plans(State(state): State<Arc<AppState>>) -> Json<Vec<PlanResponse>> {
    let catalog = state.engine.catalog();
    Json(
        [PlanTier::Free, PlanTier::Pro, PlanTier::Premium]
            .into_iter()
            .map(|tier| PlanResponse {
                tier,
                limits: catalog.limits(tier),
            })
            .collect(),
    )
}

/// Auto-renew request.
#[derive(Debug, Deserialize)]
pub struct AutoRenewRequest {
    /// Whether the plan should renew at cycle end.
    pub enabled: bool,
}

/// Turn auto-renew on or off for the current user.
pub async fn set_auto_renew(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<AutoRenewRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .engine
        .subscriptions()
        .set_auto_renew(&auth.account_id, body.enabled)?;

    tracing::info!(
        account_id = %auth.account_id,
        enabled = body.enabled,
        "Auto-renew updated"
    );

    Ok(Json(AccountResponse::from(&account)))
}
