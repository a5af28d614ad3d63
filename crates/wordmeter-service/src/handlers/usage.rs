//! Word usage handlers for text-processing services.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use wordmeter_core::{AccountId, TransactionId};
use wordmeter_ledger::Reservation;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

fn parse_account(id: &str) -> Result<AccountId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid account_id: {id}")))
}

/// Reserve request: deduct words before processing.
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    /// Account being charged.
    pub account_id: String,
    /// Words to deduct.
    pub words: i64,
}

/// Deduct words, plan quota first then purchased credit.
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<ReserveRequest>,
) -> Result<Json<Reservation>, ApiError> {
    let account_id = parse_account(&body.account_id)?;

    let reservation = state
        .engine
        .ledger()
        .reserve_and_commit(&account_id, body.words)?;

    tracing::debug!(
        account_id = %account_id,
        service = %service.service_name,
        words = body.words,
        available_after = reservation.available_after,
        "Words reserved"
    );

    Ok(Json(reservation))
}

/// Refund request: return words after a failed job.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Account that was charged.
    pub account_id: String,
    /// Words to give back.
    pub words: i64,
    /// The usage transaction being refunded.
    pub transaction_id: String,
}

/// Refund response.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// The refund transaction.
    pub transaction_id: Option<TransactionId>,
    /// Whether this refund had already been applied.
    pub replayed: bool,
    /// Words available after the refund.
    pub available_after: i64,
}

/// Refund words from an earlier reservation. Replaying the same refund is a no-op.
pub async fn refund(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let account_id = parse_account(&body.account_id)?;
    let original: TransactionId = body
        .transaction_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid transaction_id: {}", body.transaction_id)))?;

    let commit = state
        .engine
        .ledger()
        .refund(&account_id, body.words, original)?;

    tracing::info!(
        account_id = %account_id,
        service = %service.service_name,
        words = body.words,
        original = %original,
        replayed = commit.replayed,
        "Words refunded"
    );

    Ok(Json(RefundResponse {
        transaction_id: commit.transaction.as_ref().map(|tx| tx.id),
        replayed: commit.replayed,
        available_after: commit.account.total_available(),
    }))
}

/// Balance check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Account to check.
    pub account_id: String,
    /// Words the caller intends to reserve.
    pub words: i64,
}

/// Balance check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Whether a reservation of `words` would succeed now.
    pub sufficient: bool,
    /// Words available.
    pub available: i64,
    /// Largest accepted upload for the account's tier.
    pub upload_limit_bytes: i64,
}

/// Read-only pre-flight check before a job starts.
pub async fn check(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let account_id = parse_account(&body.account_id)?;
    let account = state.engine.ledger().get_account(&account_id)?;
    let available = account.total_available();

    Ok(Json(CheckResponse {
        sufficient: available >= body.words,
        available,
        upload_limit_bytes: account.upload_limit_bytes,
    }))
}
