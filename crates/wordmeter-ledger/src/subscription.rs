//! Plan activation, renewal and expiry.
//!
//! ```text
//! Free -> Active(tier) -> Expired(tier) -> Active(tier') -> ...
//!             |                |
//!             +-- renew -------+-- expire -> Free
//! ```
//!
//! All state changes go through [`AccountLedger::mutate`]. Paid cycles are
//! only ever started by a settled payment: a lapsed paid plan drops to Free
//! and, with auto-renew on, is listed in the sweep report so a renewal
//! intent can be opened for it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wordmeter_core::{
    Account, AccountId, BillingError, IntentId, LedgerTransaction, PlanTier, Result,
    SubscriptionState, DEFAULT_CYCLE_DAYS,
};

use crate::ledger::{AccountLedger, Commit};

/// A paid plan that lapsed with auto-renew on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapsedPlan {
    /// The account, now on Free.
    pub account_id: AccountId,
    /// The tier it held.
    pub tier: PlanTier,
}

/// Summary of one `process_due` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalReport {
    /// Accounts whose cycle was renewed.
    pub renewed: usize,
    /// Paid plans that reverted to free.
    pub expired: usize,
    /// Accounts that could not be processed; retried on the next sweep.
    pub failed: usize,
    /// Expired plans that asked to renew and now wait for a payment.
    pub awaiting_payment: Vec<LapsedPlan>,
    /// Renewal intents opened for `awaiting_payment`.
    pub renewal_intents: Vec<IntentId>,
}

/// Drives plan transitions on top of the ledger.
pub struct SubscriptionLifecycleManager {
    ledger: Arc<AccountLedger>,
    cycle_length: Duration,
}

impl SubscriptionLifecycleManager {
    /// Create a manager with the default 30-day cycle.
    #[must_use]
    pub fn new(ledger: Arc<AccountLedger>) -> Self {
        Self {
            ledger,
            cycle_length: Duration::days(DEFAULT_CYCLE_DAYS),
        }
    }

    /// Override the billing cycle length.
    #[must_use]
    pub fn with_cycle_length(mut self, cycle_length: Duration) -> Self {
        self.cycle_length = cycle_length;
        self
    }

    /// Configured cycle length.
    #[must_use]
    pub const fn cycle_length(&self) -> Duration {
        self.cycle_length
    }

    /// Whether `account` may move to `target` at `now`.
    ///
    /// Allowed from Free, from an expired plan, or as a strict upgrade.
    ///
    /// # Errors
    ///
    /// - `BillingError::DowngradeBlocked` for a downgrade in an unexpired cycle.
    /// - `BillingError::InvalidPlanTransition` for the current tier or for Free.
    pub fn check_transition(account: &Account, target: PlanTier, now: DateTime<Utc>) -> Result<()> {
        let invalid = || BillingError::InvalidPlanTransition {
            from: account.plan,
            to: target,
        };
        match account.subscription_state(now) {
            SubscriptionState::Free | SubscriptionState::Expired { .. } => {
                if target == PlanTier::Free {
                    Err(invalid())
                } else {
                    Ok(())
                }
            }
            SubscriptionState::Active { tier, expires_at } => {
                if tier.is_upgrade_to(target) {
                    Ok(())
                } else if target < tier {
                    Err(BillingError::DowngradeBlocked {
                        from: tier,
                        to: target,
                        expires_at,
                    })
                } else {
                    Err(invalid())
                }
            }
        }
    }

    /// Activate `tier` for one cycle of `cycle_length` starting now.
    ///
    /// # Errors
    ///
    /// See [`check_transition`](Self::check_transition).
    pub fn activate(
        &self,
        account_id: &AccountId,
        tier: PlanTier,
        cycle_length: Duration,
    ) -> Result<Account> {
        self.activate_with_reference(account_id, tier, cycle_length, None)
            .map(|commit| commit.account)
    }

    /// Activate under an external reference, so a replayed payment or coupon
    /// grant activates once.
    ///
    /// # Errors
    ///
    /// See [`check_transition`](Self::check_transition).
    pub fn activate_with_reference(
        &self,
        account_id: &AccountId,
        tier: PlanTier,
        cycle_length: Duration,
        external_reference: Option<String>,
    ) -> Result<Commit> {
        if let Some(reference) = &external_reference {
            if let Some(existing) = self
                .ledger
                .store()
                .find_transaction_by_reference(reference)?
            {
                return Ok(Commit {
                    account: self.ledger.get_account(account_id)?,
                    transaction: Some(existing),
                    replayed: true,
                });
            }
        }

        let limits = self.ledger.catalog().limits(tier);
        let commit = self.ledger.mutate(account_id, |account| {
            let now = Utc::now();
            Self::check_transition(account, tier, now)?;
            let plan_delta = limits.quota_limit - account.plan_remaining();

            account.plan = tier;
            account.plan_quota_limit = limits.quota_limit;
            account.plan_quota_used = 0;
            account.max_purchasable_credit = limits.max_purchasable_credit;
            account.upload_limit_bytes = limits.upload_limit_bytes;
            account.cycle_start = now;
            account.cycle_expires_at = now + cycle_length;

            Ok(Some(LedgerTransaction::activation(
                account.account_id,
                tier,
                plan_delta,
                external_reference.clone(),
            )))
        })?;

        if !commit.replayed {
            info!(
                account_id = %account_id,
                tier = %tier,
                expires_at = %commit.account.cycle_expires_at,
                "Activated plan"
            );
        }
        Ok(commit)
    }

    /// Start a new cycle on the current tier.
    ///
    /// Used words reset to zero and purchased credit is untouched. The new
    /// cycle follows on from the current expiry; if more than a whole cycle
    /// was missed it starts now instead. No payment is taken here, so the
    /// sweep only calls this for Free accounts.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::AccountNotFound` for an unknown account.
    pub fn renew(&self, account_id: &AccountId) -> Result<Account> {
        self.renew_at(account_id, Utc::now(), false)
            .map(|commit| commit.account)
    }

    /// Revert an expired paid plan to Free limits and start a free cycle.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPlanTransition` if the account is on Free
    /// or its cycle has not ended.
    pub fn expire(&self, account_id: &AccountId) -> Result<Account> {
        self.expire_at(account_id, Utc::now()).map(|commit| commit.account)
    }

    /// Turn automatic renewal on or off.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::AccountNotFound` for an unknown account.
    pub fn set_auto_renew(&self, account_id: &AccountId, auto_renew: bool) -> Result<Account> {
        let commit = self.ledger.mutate(account_id, |account| {
            account.auto_renew = auto_renew;
            Ok(None)
        })?;
        info!(account_id = %account_id, auto_renew, "Updated auto-renew");
        Ok(commit.account)
    }

    /// Renew or expire every account whose cycle ended by `now`.
    ///
    /// Free accounts get a new cycle. Paid accounts revert to Free; those with
    /// auto-renew are listed in `awaiting_payment` and regain their tier when
    /// a renewal payment settles. Per-account failures are logged and
    /// counted, never propagated.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due list cannot be read.
    pub fn process_due(&self, now: DateTime<Utc>) -> Result<RenewalReport> {
        let due = self.ledger.store().list_accounts_due(now)?;
        let mut report = RenewalReport::default();

        for account in due {
            let renews = account.plan == PlanTier::Free;
            let result = if renews {
                self.renew_at(&account.account_id, now, true)
            } else {
                self.expire_at(&account.account_id, now)
            };
            match result {
                Ok(commit) if commit.transaction.is_none() => {}
                Ok(_) if renews => report.renewed += 1,
                Ok(_) => {
                    report.expired += 1;
                    if account.auto_renew {
                        report.awaiting_payment.push(LapsedPlan {
                            account_id: account.account_id,
                            tier: account.plan,
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        account_id = %account.account_id,
                        error = %e,
                        "Failed to process due account"
                    );
                    report.failed += 1;
                }
            }
        }

        if report != RenewalReport::default() {
            info!(
                renewed = report.renewed,
                expired = report.expired,
                failed = report.failed,
                awaiting_payment = report.awaiting_payment.len(),
                "Processed due subscriptions"
            );
        }
        Ok(report)
    }

    fn renew_at(&self, account_id: &AccountId, now: DateTime<Utc>, only_if_due: bool) -> Result<Commit> {
        let catalog = self.ledger.catalog().clone();
        let cycle_length = self.cycle_length;

        let commit = self.ledger.mutate(account_id, |account| {
            // The sweep only renews Free cycles; paid ones need a payment.
            if only_if_due && (account.plan != PlanTier::Free || !account.is_cycle_expired(now)) {
                return Ok(None);
            }
            let limits = catalog.limits(account.plan);
            let plan_delta = limits.quota_limit - account.plan_remaining();
            let start = if account.cycle_expires_at + cycle_length <= now {
                now
            } else {
                account.cycle_expires_at
            };

            account.plan_quota_limit = limits.quota_limit;
            account.plan_quota_used = 0;
            account.max_purchasable_credit = limits.max_purchasable_credit;
            account.upload_limit_bytes = limits.upload_limit_bytes;
            account.cycle_start = start;
            account.cycle_expires_at = start + cycle_length;

            Ok(Some(LedgerTransaction::renewal(
                account.account_id,
                account.plan,
                plan_delta,
            )))
        })?;

        if commit.transaction.is_some() {
            info!(
                account_id = %account_id,
                tier = %commit.account.plan,
                expires_at = %commit.account.cycle_expires_at,
                "Renewed plan cycle"
            );
        }
        Ok(commit)
    }

    fn expire_at(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<Commit> {
        let free = self.ledger.catalog().limits(PlanTier::Free);
        let cycle_length = self.cycle_length;

        let commit = self.ledger.mutate(account_id, |account| {
            if account.plan == PlanTier::Free || !account.is_cycle_expired(now) {
                return Err(BillingError::InvalidPlanTransition {
                    from: account.plan,
                    to: PlanTier::Free,
                });
            }
            let from = account.plan;
            let plan_delta = free.quota_limit - account.plan_remaining();

            account.plan = PlanTier::Free;
            account.plan_quota_limit = free.quota_limit;
            account.plan_quota_used = 0;
            account.max_purchasable_credit = free.max_purchasable_credit;
            account.upload_limit_bytes = free.upload_limit_bytes;
            account.cycle_start = now;
            account.cycle_expires_at = now + cycle_length;

            Ok(Some(LedgerTransaction::expiry(account.account_id, from, plan_delta)))
        })?;

        info!(account_id = %account_id, "Plan expired to free");
        Ok(commit)
    }
}
