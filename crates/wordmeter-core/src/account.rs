//! Account balance state.
//!
//! An account holds two word balances: the plan quota, which resets every
//! billing cycle, and purchased credit, which never expires. Usage always
//! drains the plan quota before touching purchased credit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{PlanCatalog, PlanTier};
use crate::AccountId;

/// Default billing cycle length in days.
pub const DEFAULT_CYCLE_DAYS: i64 = 30;

/// A metered account.
///
/// Owned by the ledger; every mutation bumps `version`, and writes are
/// conditional on the version the writer read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account id (from the identity provider).
    pub account_id: AccountId,

    /// Current subscription tier.
    pub plan: PlanTier,

    /// Words available in the current cycle.
    pub plan_quota_limit: i64,

    /// Words consumed from the plan quota in the current cycle.
    pub plan_quota_used: i64,

    /// Purchased words; never expire.
    pub purchased_credit: i64,

    /// Tier ceiling on `purchased_credit`.
    pub max_purchasable_credit: i64,

    /// Tier upload limit in bytes.
    pub upload_limit_bytes: i64,

    /// Start of the current cycle.
    pub cycle_start: DateTime<Utc>,

    /// End of the current cycle.
    pub cycle_expires_at: DateTime<Utc>,

    /// Whether the scheduler renews the plan at cycle end.
    pub auto_renew: bool,

    /// Optimistic-concurrency counter.
    pub version: u64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Derived subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubscriptionState {
    /// On the free tier.
    Free,
    /// Paid tier with an unexpired cycle.
    Active {
        /// The paid tier.
        tier: PlanTier,
        /// Cycle end.
        expires_at: DateTime<Utc>,
    },
    /// Paid tier whose cycle has ended and was not renewed yet.
    Expired {
        /// The lapsed tier.
        tier: PlanTier,
    },
}

impl Account {
    /// Create a new account on the free tier with a fresh cycle.
    #[must_use]
    pub fn new(account_id: AccountId, catalog: &PlanCatalog) -> Self {
        Self::new_at(account_id, catalog, Utc::now())
    }

    /// Create a new free-tier account whose cycle starts at `now`.
    #[must_use]
    pub fn new_at(account_id: AccountId, catalog: &PlanCatalog, now: DateTime<Utc>) -> Self {
        let limits = catalog.limits(PlanTier::Free);
        Self {
            account_id,
            plan: PlanTier::Free,
            plan_quota_limit: limits.quota_limit,
            plan_quota_used: 0,
            purchased_credit: 0,
            max_purchasable_credit: limits.max_purchasable_credit,
            upload_limit_bytes: limits.upload_limit_bytes,
            cycle_start: now,
            cycle_expires_at: now + Duration::days(DEFAULT_CYCLE_DAYS),
            auto_renew: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Words left in the plan quota for this cycle.
    #[must_use]
    pub fn plan_remaining(&self) -> i64 {
        (self.plan_quota_limit - self.plan_quota_used).max(0)
    }

    /// Plan remainder plus purchased credit.
    #[must_use]
    pub fn total_available(&self) -> i64 {
        self.plan_remaining() + self.purchased_credit
    }

    /// Whether the current cycle has ended at `now`.
    #[must_use]
    pub fn is_cycle_expired(&self, now: DateTime<Utc>) -> bool {
        self.cycle_expires_at <= now
    }

    /// Subscription state at `now`.
    #[must_use]
    pub fn subscription_state(&self, now: DateTime<Utc>) -> SubscriptionState {
        match self.plan {
            PlanTier::Free => SubscriptionState::Free,
            tier if self.is_cycle_expired(now) => SubscriptionState::Expired { tier },
            tier => SubscriptionState::Active {
                tier,
                expires_at: self.cycle_expires_at,
            },
        }
    }

    /// Check the balance invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.plan_quota_used < 0 {
            return Err(format!("plan_quota_used negative: {}", self.plan_quota_used));
        }
        if self.plan_quota_used > self.plan_quota_limit {
            return Err(format!(
                "plan_quota_used {} exceeds limit {}",
                self.plan_quota_used, self.plan_quota_limit
            ));
        }
        if self.purchased_credit < 0 {
            return Err(format!("purchased_credit negative: {}", self.purchased_credit));
        }
        Ok(())
    }

    /// Mark the account as changed: bump the version and the update time.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}
