//! Account, balance and transaction history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wordmeter_core::{Account, LedgerTransaction, PlanTier, SubscriptionState};
use wordmeter_ledger::AccountLedger;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::{default_limit, MAX_PAGE};
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Current tier.
    pub plan: PlanTier,
    /// Derived subscription state.
    pub subscription: SubscriptionState,
    /// Words available this cycle.
    pub plan_quota_limit: i64,
    /// Words used this cycle.
    pub plan_quota_used: i64,
    /// Purchased words, carried across cycles.
    pub purchased_credit: i64,
    /// Ceiling on purchased words.
    pub max_purchasable_credit: i64,
    /// Largest accepted upload.
    pub upload_limit_bytes: i64,
    /// Current cycle start.
    pub cycle_start: DateTime<Utc>,
    /// Current cycle end.
    pub cycle_expires_at: DateTime<Utc>,
    /// Whether the plan renews at cycle end.
    pub auto_renew: bool,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.account_id.to_string(),
            plan: account.plan,
            subscription: account.subscription_state(Utc::now()),
            plan_quota_limit: account.plan_quota_limit,
            plan_quota_used: account.plan_quota_used,
            purchased_credit: account.purchased_credit,
            max_purchasable_credit: account.max_purchasable_credit,
            upload_limit_bytes: account.upload_limit_bytes,
            cycle_start: account.cycle_start,
            cycle_expires_at: account.cycle_expires_at,
            auto_renew: account.auto_renew,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create or register a new account on the free tier.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.engine.ledger().open_account(auth.account_id)?;

    tracing::info!(account_id = %auth.account_id, "Account created");

    Ok(Json(AccountResponse::from(&account)))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.engine.ledger().get_account(&auth.account_id)?;
    Ok(Json(AccountResponse::from(&account)))
}

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Words left in the current cycle.
    pub plan_remaining: i64,
    /// Purchased words.
    pub purchased_credit: i64,
    /// Plan remainder plus purchased words.
    pub total_available: i64,
    /// Current tier.
    pub plan: PlanTier,
    /// Current cycle end.
    pub cycle_expires_at: DateTime<Utc>,
}

/// Get the current balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.engine.ledger().get_account(&auth.account_id)?;

    Ok(Json(BalanceResponse {
        plan_remaining: account.plan_remaining(),
        purchased_credit: account.purchased_credit,
        total_available: AccountLedger::get_available(&account),
        plan: account.plan,
        cycle_expires_at: account.cycle_expires_at,
    }))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum results.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Results to skip.
    #[serde(default)]
    pub offset: usize,
}

/// Transaction list response.
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    /// Transactions, newest first.
    pub transactions: Vec<LedgerTransaction>,
    /// Whether another page exists.
    pub has_more: bool,
}

/// List the current user's ledger history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let limit = query.limit.min(MAX_PAGE);

    let mut transactions =
        state
            .engine
            .ledger()
            .list_transactions(&auth.account_id, limit + 1, query.offset)?;

    let has_more = transactions.len() > limit;
    transactions.truncate(limit);

    Ok(Json(TransactionsResponse {
        transactions,
        has_more,
    }))
}
