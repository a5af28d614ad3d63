//! Quota deduction ordering.
//!
//! Usage drains the plan quota first and only then purchased credit, so the
//! balance that never expires is kept for as long as possible.

use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::error::BillingError;

/// How a usage request splits across the two pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    /// Words taken from the plan quota.
    pub from_plan: i64,
    /// Words taken from purchased credit.
    pub from_credit: i64,
}

impl Deduction {
    /// Total words deducted.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.from_plan + self.from_credit
    }

    /// Whether nothing is deducted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.from_plan == 0 && self.from_credit == 0
    }

    /// Apply the split to an account. The split must come from [`compute_deduction`]
    /// on the same account state.
    pub fn apply(&self, account: &mut Account) {
        account.plan_quota_used += self.from_plan;
        account.purchased_credit -= self.from_credit;
    }
}

/// Decide how `words` splits across plan quota and purchased credit.
///
/// Pure: the account is not modified. Zero words yields an empty deduction.
///
/// # Errors
///
/// - `BillingError::InvalidAmount` for a negative request.
/// - `BillingError::InsufficientBalance` when plan remainder plus credit is short.
pub fn compute_deduction(account: &Account, words: i64) -> Result<Deduction, BillingError> {
    if words < 0 {
        return Err(BillingError::InvalidAmount(format!(
            "cannot deduct negative words: {words}"
        )));
    }

    let from_plan = account.plan_remaining().min(words);
    let from_credit = words - from_plan;

    if from_credit > account.purchased_credit {
        return Err(BillingError::InsufficientBalance {
            available: account.total_available(),
            requested: words,
        });
    }

    Ok(Deduction {
        from_plan,
        from_credit,
    })
}
