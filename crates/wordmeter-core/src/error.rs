//! Error types for wordmeter.

use chrono::{DateTime, Utc};

use crate::ids::IdError;
use crate::plan::PlanTier;

/// Result type for wordmeter operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in ledger, payment, coupon and subscription operations.
///
/// Every variant maps to a stable machine-readable code via [`BillingError::code`].
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The request needs more words than the account holds.
    #[error("insufficient balance: available={available}, requested={requested}, shortfall={}", .requested - .available)]
    InsufficientBalance {
        /// Words available (plan remainder plus purchased credit).
        available: i64,
        /// Words requested.
        requested: i64,
    },

    /// Coupon unknown, inactive, or not applicable to this purpose.
    #[error("invalid coupon {code}: {reason}")]
    InvalidCoupon {
        /// The coupon code.
        code: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Coupon has no uses left.
    #[error("coupon exhausted: {code}")]
    CouponExhausted {
        /// The coupon code.
        code: String,
    },

    /// Coupon is past its expiry.
    #[error("coupon expired: {code}")]
    CouponExpired {
        /// The coupon code.
        code: String,
    },

    /// Settlement signature did not match the payload.
    #[error("settlement signature invalid")]
    SignatureInvalid,

    /// No payment intent with this id.
    #[error("unknown payment intent: {intent_id}")]
    UnknownIntent {
        /// The intent id.
        intent_id: String,
    },

    /// Downgrade requested while the current cycle is unexpired.
    #[error("downgrade from {from} to {to} blocked until {expires_at}")]
    DowngradeBlocked {
        /// The current tier.
        from: PlanTier,
        /// The requested tier.
        to: PlanTier,
        /// When the current cycle ends.
        expires_at: DateTime<Utc>,
    },

    /// Plan code outside the catalog.
    #[error("unknown plan: {code}")]
    PlanUnknown {
        /// The rejected code.
        code: String,
    },

    /// Transition that is neither an upgrade nor allowed by the cycle state.
    #[error("invalid plan transition from {from} to {to}")]
    InvalidPlanTransition {
        /// The current tier.
        from: PlanTier,
        /// The requested tier.
        to: PlanTier,
    },

    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account id.
        account_id: String,
    },

    /// Account already exists.
    #[error("account already exists: {account_id}")]
    AccountAlreadyExists {
        /// The account id.
        account_id: String,
    },

    /// Transaction not found.
    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound {
        /// The transaction id.
        transaction_id: String,
    },

    /// Amount is negative, zero where a positive value is required, or otherwise malformed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A credit purchase would push purchased credit over the tier cap.
    #[error("credit cap exceeded: current={current}, requested={requested}, cap={cap}")]
    CreditCapExceeded {
        /// Purchased credit held now.
        current: i64,
        /// Words being added.
        requested: i64,
        /// Tier ceiling.
        cap: i64,
    },

    /// Verified payload disagrees with the stored intent.
    #[error("settlement mismatch: {0}")]
    SettlementMismatch(String),

    /// The intent already reached the terminal failed state.
    #[error("payment intent failed: {intent_id}")]
    IntentFailed {
        /// The intent id.
        intent_id: String,
    },

    /// Payment verified but the ledger write did not land; needs retry or manual action.
    #[error("reconciliation gap for intent {intent_id}: {reason}")]
    ReconciliationGap {
        /// The intent id.
        intent_id: String,
        /// The underlying failure.
        reason: String,
    },

    /// A zero-amount grant was attempted without a redeemed coupon.
    #[error("zero-amount grant requires a redeemed coupon")]
    FreeGrantRequiresCoupon,

    /// Optimistic write kept losing to concurrent writers.
    #[error("account {account_id} contended after {attempts} attempts")]
    Contention {
        /// The account id.
        account_id: String,
        /// Attempts made.
        attempts: u32,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BillingError {
    /// Stable error code for clients and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvalidCoupon { .. } => "INVALID_COUPON",
            Self::CouponExhausted { .. } => "COUPON_EXHAUSTED",
            Self::CouponExpired { .. } => "COUPON_EXPIRED",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::UnknownIntent { .. } => "UNKNOWN_INTENT",
            Self::DowngradeBlocked { .. } => "DOWNGRADE_BLOCKED",
            Self::PlanUnknown { .. } => "PLAN_UNKNOWN",
            Self::InvalidPlanTransition { .. } => "INVALID_PLAN_TRANSITION",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::AccountAlreadyExists { .. } => "ACCOUNT_EXISTS",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::CreditCapExceeded { .. } => "CREDIT_CAP_EXCEEDED",
            Self::SettlementMismatch(_) => "SETTLEMENT_MISMATCH",
            Self::IntentFailed { .. } => "INTENT_FAILED",
            Self::ReconciliationGap { .. } => "RECONCILIATION_GAP",
            Self::FreeGrantRequiresCoupon => "FREE_GRANT_REQUIRES_COUPON",
            Self::Contention { .. } => "CONTENTION",
            Self::Storage(_) | Self::Serialization(_) => "STORAGE",
            Self::InvalidId(_) => "INVALID_ID",
            Self::Configuration(_) => "CONFIGURATION",
        }
    }

    /// Words missing for an `InsufficientBalance` error.
    #[must_use]
    pub const fn shortfall(&self) -> Option<i64> {
        match self {
            Self::InsufficientBalance {
                available,
                requested,
            } => Some(*requested - *available),
            _ => None,
        }
    }
}
