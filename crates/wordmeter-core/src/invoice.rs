//! Immutable receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::LedgerTransaction;
use crate::{AccountId, IntentId, InvoiceId, TransactionId};

/// A receipt for one completed ledger-affecting transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice id.
    pub id: InvoiceId,
    /// The account billed.
    pub account_id: AccountId,
    /// The ledger transaction this receipt covers.
    pub transaction_id: TransactionId,
    /// The payment intent, for paid transactions.
    pub intent_id: Option<IntentId>,
    /// Amount paid.
    pub amount_cents: i64,
    /// Discount applied.
    pub discount_cents: i64,
    /// Coupon used, if any.
    pub coupon_code: Option<String>,
    /// ISO currency code.
    pub currency: String,
    /// Plan words granted.
    pub plan_words: i64,
    /// Purchased words granted.
    pub credit_words: i64,
    /// Line description.
    pub description: String,
    /// When the receipt was issued.
    pub issued_at: DateTime<Utc>,
}

impl Invoice {
    /// Build a receipt from the transaction it covers.
    #[must_use]
    pub fn for_transaction(tx: &LedgerTransaction, amount_cents: i64, currency: &str) -> Self {
        Self {
            id: InvoiceId::generate(),
            account_id: tx.account_id,
            transaction_id: tx.id,
            intent_id: None,
            amount_cents,
            discount_cents: 0,
            coupon_code: None,
            currency: currency.to_ascii_uppercase(),
            plan_words: tx.delta_plan_quota.max(0),
            credit_words: tx.delta_purchased_credit.max(0),
            description: tx.description.clone(),
            issued_at: Utc::now(),
        }
    }

    /// Attach the intent that paid for the transaction.
    #[must_use]
    pub fn with_intent(mut self, intent_id: IntentId) -> Self {
        self.intent_id = Some(intent_id);
        self
    }

    /// Attach coupon details.
    #[must_use]
    pub fn with_coupon(mut self, code: Option<String>, discount_cents: i64) -> Self {
        self.coupon_code = code;
        self.discount_cents = discount_cents;
        self
    }
}
