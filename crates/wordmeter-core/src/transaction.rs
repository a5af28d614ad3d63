//! Ledger transaction types.
//!
//! Every change to an account's balances appends one transaction. The log is
//! append-only and doubles as the idempotency boundary: a transaction carrying
//! an `external_reference` can exist at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deduction::Deduction;
use crate::plan::PlanTier;
use crate::{AccountId, TransactionId};

/// One append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose balances changed.
    pub account_id: AccountId,

    /// Change to the plan quota available this cycle.
    /// Negative when usage consumes quota, positive when quota is returned or granted.
    pub delta_plan_quota: i64,

    /// Change to purchased credit.
    pub delta_purchased_credit: i64,

    /// Why the balances changed.
    pub reason: TransactionReason,

    /// Idempotency key from an external event (payment, coupon grant, refund).
    pub external_reference: Option<String>,

    /// For refunds: the usage transaction being reversed.
    pub refund_of: Option<TransactionId>,

    /// Human-readable description.
    pub description: String,

    /// Additional metadata (plan, intent id, coupon code, ...).
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    fn base(account_id: AccountId, reason: TransactionReason, description: String) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            delta_plan_quota: 0,
            delta_purchased_credit: 0,
            reason,
            external_reference: None,
            refund_of: None,
            description,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// A usage deduction. Deltas are negative.
    #[must_use]
    pub fn usage(account_id: AccountId, deduction: Deduction) -> Self {
        let mut tx = Self::base(
            account_id,
            TransactionReason::Usage,
            format!("Used {} words", deduction.total()),
        );
        tx.delta_plan_quota = -deduction.from_plan;
        tx.delta_purchased_credit = -deduction.from_credit;
        tx
    }

    /// Reversal of (part of) a usage deduction.
    ///
    /// The refund reference is derived from the original transaction id, so
    /// a second refund of the same usage collides in the reference index.
    #[must_use]
    pub fn refund(account_id: AccountId, original: TransactionId, returned: Deduction) -> Self {
        let mut tx = Self::base(
            account_id,
            TransactionReason::Refund,
            format!("Refunded {} words", returned.total()),
        );
        tx.delta_plan_quota = returned.from_plan;
        tx.delta_purchased_credit = returned.from_credit;
        tx.refund_of = Some(original);
        tx.external_reference = Some(Self::refund_reference(original));
        tx
    }

    /// Reference under which the refund of `original` is recorded.
    #[must_use]
    pub fn refund_reference(original: TransactionId) -> String {
        format!("refund:{original}")
    }

    /// A credit from a settled payment or a coupon grant.
    #[must_use]
    pub fn credit(
        account_id: AccountId,
        plan_delta: i64,
        credit_delta: i64,
        external_reference: String,
    ) -> Self {
        let mut tx = Self::base(
            account_id,
            TransactionReason::Credit,
            format!("Credited {credit_delta} purchased words and {plan_delta} plan words"),
        );
        tx.delta_plan_quota = plan_delta;
        tx.delta_purchased_credit = credit_delta;
        tx.external_reference = Some(external_reference);
        tx
    }

    /// A plan activation or upgrade.
    #[must_use]
    pub fn activation(
        account_id: AccountId,
        tier: PlanTier,
        plan_delta: i64,
        external_reference: Option<String>,
    ) -> Self {
        let mut tx = Self::base(
            account_id,
            TransactionReason::Activation,
            format!("Activated {tier} plan"),
        );
        tx.delta_plan_quota = plan_delta;
        tx.external_reference = external_reference;
        tx.metadata = serde_json::json!({ "plan": tier.code() });
        tx
    }

    /// A cycle renewal that restores the plan quota.
    #[must_use]
    pub fn renewal(account_id: AccountId, tier: PlanTier, plan_delta: i64) -> Self {
        let mut tx = Self::base(
            account_id,
            TransactionReason::Renewal,
            format!("Renewed {tier} plan cycle"),
        );
        tx.delta_plan_quota = plan_delta;
        tx.metadata = serde_json::json!({ "plan": tier.code() });
        tx
    }

    /// A lapsed paid plan reverting to free limits.
    #[must_use]
    pub fn expiry(account_id: AccountId, from: PlanTier, plan_delta: i64) -> Self {
        let mut tx = Self::base(
            account_id,
            TransactionReason::Expiry,
            format!("{from} plan expired"),
        );
        tx.delta_plan_quota = plan_delta;
        tx.metadata = serde_json::json!({ "plan": from.code() });
        tx
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Why a ledger transaction was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionReason {
    /// Words consumed.
    Usage,
    /// Consumed words returned after a downstream failure.
    Refund,
    /// Paid or coupon-granted words.
    Credit,
    /// Plan quota restored at cycle boundary.
    Renewal,
    /// Plan activated or upgraded.
    Activation,
    /// Paid plan lapsed back to free.
    Expiry,
}

impl TransactionReason {
    /// Whether the transaction consumes words.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Usage)
    }
}
