//! Payment gateway webhook.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use wordmeter_core::{BillingError, IntentId, SettlementOutcome};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-wordmeter-signature";

/// Just enough of the payload to find the intent before verifying.
#[derive(Debug, Deserialize)]
struct IntentRef {
    intent_id: IntentId,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
    /// What the settlement did.
    pub outcome: SettlementOutcome,
}

/// Handle a settlement notification. Deliveries may repeat; only the first credits.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Settlement webhook without signature");
            ApiError::Billing(BillingError::SignatureInvalid)
        })?;

    let intent_ref: IntentRef = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid settlement payload: {e}")))?;

    let outcome = state
        .engine
        .reconciler()
        .verify_and_settle(&intent_ref.intent_id, signature, &body)
        .map_err(|e| {
            tracing::warn!(
                intent_id = %intent_ref.intent_id,
                code = e.code(),
                error = %e,
                "Settlement rejected"
            );
            e
        })?;

    tracing::info!(
        intent_id = %intent_ref.intent_id,
        outcome = ?outcome,
        "Settlement webhook processed"
    );

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}
