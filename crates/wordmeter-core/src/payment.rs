//! Payment intents and settlement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;
use crate::{AccountId, IntentId, TransactionId};

/// What a payment buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// Activate or upgrade a plan tier.
    Subscription,
    /// Buy purchased credit.
    CreditPurchase,
}

/// Lifecycle of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created, waiting for the gateway.
    Pending,
    /// Settled; the ledger effect has been applied (or is an open gap).
    Completed,
    /// Terminal failure; no ledger effect.
    Failed,
}

impl IntentStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The grant a payment delivers once settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    /// Activate a tier for one cycle.
    Plan {
        /// Target tier.
        tier: PlanTier,
    },
    /// Add purchased credit.
    Credit {
        /// Words to add.
        words: i64,
    },
}

impl Grant {
    /// The payment purpose this grant belongs to.
    #[must_use]
    pub const fn purpose(&self) -> PaymentPurpose {
        match self {
            Self::Plan { .. } => PaymentPurpose::Subscription,
            Self::Credit { .. } => PaymentPurpose::CreditPurchase,
        }
    }
}

/// A payment intent, persisted before the gateway is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Intent id.
    pub id: IntentId,

    /// Paying account.
    pub account_id: AccountId,

    /// Amount charged after discounts, in the smallest currency unit.
    pub amount_cents: i64,

    /// ISO currency code.
    pub currency: String,

    /// What the payment buys.
    pub grant: Grant,

    /// Current status.
    pub status: IntentStatus,

    /// Reference the gateway echoes back; the ledger idempotency key.
    pub external_reference: String,

    /// Coupon applied at checkout, if any.
    pub coupon_code: Option<String>,

    /// Discount applied at checkout.
    pub discount_cents: i64,

    /// Gateway-side payment id, known after settlement.
    pub gateway_payment_id: Option<String>,

    /// Failure reason for failed intents.
    pub failure_reason: Option<String>,

    /// When the intent was created.
    pub created_at: DateTime<Utc>,

    /// When the intent reached a terminal status.
    pub settled_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    /// Create a pending intent. The external reference is derived from the id.
    #[must_use]
    pub fn new(account_id: AccountId, grant: Grant, amount_cents: i64, currency: &str) -> Self {
        let id = IntentId::generate();
        Self {
            id,
            account_id,
            amount_cents,
            currency: currency.to_ascii_uppercase(),
            grant,
            status: IntentStatus::Pending,
            external_reference: Self::reference_for(id),
            coupon_code: None,
            discount_cents: 0,
            gateway_payment_id: None,
            failure_reason: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// External reference for an intent id.
    #[must_use]
    pub fn reference_for(id: IntentId) -> String {
        format!("pi_{id}")
    }

    /// What the payment buys.
    #[must_use]
    pub const fn purpose(&self) -> PaymentPurpose {
        self.grant.purpose()
    }
}

/// Body the gateway posts when a payment settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPayload {
    /// Intent being settled.
    pub intent_id: IntentId,
    /// Must equal the intent's external reference.
    pub reference: String,
    /// Gateway-side payment id.
    pub gateway_payment_id: String,
    /// Amount collected.
    pub amount_cents: i64,
    /// Currency collected.
    pub currency: String,
    /// Gateway outcome.
    pub status: SettlementStatus,
    /// Gateway failure reason for failed payments.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Gateway-reported payment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Money collected.
    Paid,
    /// Payment declined or abandoned.
    Failed,
}

/// Result of a settle call that did not error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// This call applied the ledger effect.
    Settled {
        /// The ledger transaction written.
        transaction_id: TransactionId,
    },
    /// An earlier call already applied it; nothing was re-credited.
    AlreadySettled {
        /// The ledger transaction written by the earlier call.
        transaction_id: Option<TransactionId>,
    },
    /// The gateway reported a failure and the intent was marked failed.
    Failed {
        /// Failure reason.
        reason: String,
    },
}

/// A verified payment whose ledger write did not land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationGap {
    /// The completed intent.
    pub intent_id: IntentId,
    /// The account that paid.
    pub account_id: AccountId,
    /// Ledger idempotency key for the missing credit.
    pub external_reference: String,
    /// Last failure seen.
    pub last_error: String,
    /// Credit attempts so far.
    pub attempts: u32,
    /// When the gap was first recorded.
    pub detected_at: DateTime<Utc>,
    /// When a retry closed the gap.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationGap {
    /// Record a gap for `intent`.
    #[must_use]
    pub fn open(intent: &PaymentIntent, error: String) -> Self {
        Self {
            intent_id: intent.id,
            account_id: intent.account_id,
            external_reference: intent.external_reference.clone(),
            last_error: error,
            attempts: 1,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Whether the gap is still open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}
