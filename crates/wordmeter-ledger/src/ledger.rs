//! The account ledger.
//!
//! `AccountLedger` is the only writer of account state. Every mutation reads
//! the account, computes the next state, and commits it conditionally on the
//! version it read, together with the ledger transaction describing the change.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wordmeter_core::{
    compute_deduction, Account, AccountId, BillingError, Deduction, LedgerTransaction,
    PaymentPurpose, PlanCatalog, Result, TransactionId, TransactionReason,
};
use wordmeter_store::{Store, StoreError};

/// Conditional-write attempts before a mutation gives up with `Contention`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Result of a committed (or replayed) mutation.
#[derive(Debug, Clone)]
pub struct Commit {
    /// Account state after the mutation.
    pub account: Account,
    /// The transaction written, or the earlier one on replay.
    pub transaction: Option<LedgerTransaction>,
    /// True when the external reference was already recorded and nothing changed.
    pub replayed: bool,
}

impl Commit {
    /// The transaction, for mutations that always write one.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Storage` if no transaction was recorded.
    pub fn into_transaction(self) -> Result<LedgerTransaction> {
        self.transaction
            .ok_or_else(|| BillingError::Storage("mutation recorded no transaction".into()))
    }
}

/// Outcome of a usage reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The usage transaction; `None` for a zero-word request.
    pub transaction_id: Option<TransactionId>,
    /// Words taken from the plan quota.
    pub from_plan: i64,
    /// Words taken from purchased credit.
    pub from_credit: i64,
    /// Words still available afterwards.
    pub available_after: i64,
}

/// Single writer of account balances.
pub struct AccountLedger {
    store: Arc<dyn Store>,
    catalog: PlanCatalog,
    max_attempts: u32,
}

impl AccountLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, catalog: PlanCatalog) -> Self {
        Self {
            store,
            catalog,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the conditional-write retry bound.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The plan catalog accounts are opened against.
    #[must_use]
    pub const fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Total words an account can spend right now.
    #[must_use]
    pub fn get_available(account: &Account) -> i64 {
        account.total_available()
    }

    /// Create an account on the free tier.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::AccountAlreadyExists` if the id is taken.
    pub fn open_account(&self, account_id: AccountId) -> Result<Account> {
        let account = Account::new(account_id, &self.catalog);
        self.store.insert_account(&account).map_err(|e| match e {
            StoreError::AlreadyExists { .. } => BillingError::AccountAlreadyExists {
                account_id: account_id.to_string(),
            },
            other => other.into(),
        })?;
        info!(account_id = %account_id, "Opened account");
        Ok(account)
    }

    /// Load an account.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::AccountNotFound` if it doesn't exist.
    pub fn get_account(&self, account_id: &AccountId) -> Result<Account> {
        self.store
            .get_account(account_id)?
            .ok_or_else(|| BillingError::AccountNotFound {
                account_id: account_id.to_string(),
            })
    }

    /// Words available to an account.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::AccountNotFound` if it doesn't exist.
    pub fn available(&self, account_id: &AccountId) -> Result<i64> {
        self.get_account(account_id).map(|a| Self::get_available(&a))
    }

    /// List an account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>> {
        Ok(self
            .store
            .list_transactions_by_account(account_id, limit, offset)?)
    }

    /// Deduct `words`, plan quota first, in one conditional write.
    ///
    /// Zero words is a no-op that writes nothing.
    ///
    /// # Errors
    ///
    /// - `BillingError::InsufficientBalance` when the account can't cover it;
    ///   nothing is changed.
    /// - `BillingError::InvalidAmount` for negative words.
    /// - `BillingError::Contention` when concurrent writers keep winning.
    pub fn reserve_and_commit(&self, account_id: &AccountId, words: i64) -> Result<Reservation> {
        if words == 0 {
            let account = self.get_account(account_id)?;
            return Ok(Reservation {
                transaction_id: None,
                from_plan: 0,
                from_credit: 0,
                available_after: account.total_available(),
            });
        }

        let mut split = Deduction::default();
        let commit = self.mutate(account_id, |account| {
            split = compute_deduction(account, words)?;
            split.apply(account);
            Ok(Some(LedgerTransaction::usage(account.account_id, split)))
        })?;

        debug!(
            account_id = %account_id,
            words,
            from_plan = split.from_plan,
            from_credit = split.from_credit,
            "Committed usage"
        );

        Ok(Reservation {
            transaction_id: commit.transaction.as_ref().map(|tx| tx.id),
            from_plan: split.from_plan,
            from_credit: split.from_credit,
            available_after: commit.account.total_available(),
        })
    }

    /// Return up to the words of a prior usage transaction.
    ///
    /// Words go back to the pool they came from, purchased credit first since
    /// it was drawn last. Plan words returned after a cycle reset are dropped
    /// (used is clamped at zero). Idempotent per original transaction: a second
    /// call returns the first refund unchanged.
    ///
    /// # Errors
    ///
    /// - `BillingError::TransactionNotFound` if the original is unknown, belongs
    ///   to another account, or is not a usage transaction.
    /// - `BillingError::InvalidAmount` for non-positive words or more than the original.
    pub fn refund(
        &self,
        account_id: &AccountId,
        words: i64,
        original_transaction_id: TransactionId,
    ) -> Result<Commit> {
        let original = self
            .store
            .get_transaction(&original_transaction_id)?
            .filter(|tx| tx.account_id == *account_id && tx.reason == TransactionReason::Usage)
            .ok_or_else(|| BillingError::TransactionNotFound {
                transaction_id: original_transaction_id.to_string(),
            })?;

        let reference = LedgerTransaction::refund_reference(original_transaction_id);
        if let Some(existing) = self.store.find_transaction_by_reference(&reference)? {
            debug!(account_id = %account_id, %reference, "Refund already applied");
            return self.replayed(account_id, existing);
        }

        let used_plan = -original.delta_plan_quota;
        let used_credit = -original.delta_purchased_credit;
        if words <= 0 || words > used_plan + used_credit {
            return Err(BillingError::InvalidAmount(format!(
                "refund of {words} words against a usage of {}",
                used_plan + used_credit
            )));
        }

        let commit = self.mutate(account_id, |account| {
            let from_credit = words.min(used_credit);
            let from_plan = (words - from_credit).min(account.plan_quota_used);
            let returned = Deduction {
                from_plan,
                from_credit,
            };
            account.plan_quota_used -= returned.from_plan;
            account.purchased_credit += returned.from_credit;
            Ok(Some(LedgerTransaction::refund(
                account.account_id,
                original_transaction_id,
                returned,
            )))
        })?;

        if !commit.replayed {
            info!(
                account_id = %account_id,
                original = %original_transaction_id,
                words,
                "Refunded usage"
            );
        }
        Ok(commit)
    }

    /// Credit plan and purchased words under an external reference.
    ///
    /// Positive `plan_delta` raises this cycle's quota limit; the next renewal
    /// resets it to the catalog value. A reference that already has a
    /// transaction makes this a no-op that returns the earlier transaction.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidAmount` for negative deltas or a zero credit.
    /// - `BillingError::CreditCapExceeded` if purchased credit would pass the tier cap.
    pub fn credit(
        &self,
        account_id: &AccountId,
        purpose: PaymentPurpose,
        plan_delta: i64,
        credit_delta: i64,
        external_reference: &str,
    ) -> Result<Commit> {
        if plan_delta < 0 || credit_delta < 0 || (plan_delta == 0 && credit_delta == 0) {
            return Err(BillingError::InvalidAmount(format!(
                "credit needs positive deltas, got plan={plan_delta} credit={credit_delta}"
            )));
        }

        if let Some(existing) = self.store.find_transaction_by_reference(external_reference)? {
            debug!(account_id = %account_id, reference = external_reference, "Credit already applied");
            return self.replayed(account_id, existing);
        }

        let commit = self.mutate(account_id, |account| {
            Self::check_credit_cap(account, credit_delta)?;
            account.plan_quota_limit = account
                .plan_quota_limit
                .checked_add(plan_delta)
                .ok_or_else(|| {
                    BillingError::InvalidAmount(format!("plan quota overflow adding {plan_delta}"))
                })?;
            account.purchased_credit += credit_delta;
            let tx = LedgerTransaction::credit(
                account.account_id,
                plan_delta,
                credit_delta,
                external_reference.to_string(),
            )
            .with_metadata(serde_json::json!({ "purpose": purpose }));
            Ok(Some(tx))
        })?;

        if !commit.replayed {
            info!(
                account_id = %account_id,
                reference = external_reference,
                plan_delta,
                credit_delta,
                "Credited account"
            );
        }
        Ok(commit)
    }

    /// Whether buying `words` more purchased credit stays under the tier cap.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::CreditCapExceeded` when it would not, including
    /// when the sum doesn't fit in an `i64`.
    pub fn check_credit_cap(account: &Account, words: i64) -> Result<()> {
        let within_cap = account
            .purchased_credit
            .checked_add(words)
            .is_some_and(|total| total <= account.max_purchasable_credit);
        if !within_cap {
            return Err(BillingError::CreditCapExceeded {
                current: account.purchased_credit,
                requested: words,
                cap: account.max_purchasable_credit,
            });
        }
        Ok(())
    }

    /// Apply `change` to an account under optimistic concurrency.
    ///
    /// `change` may run several times, once per attempt, each time on a fresh
    /// copy of the stored account. It returns the transaction to append, or
    /// `None` for a state-only change. A change that leaves the account equal
    /// and returns `None` writes nothing.
    ///
    /// # Errors
    ///
    /// - Any error returned by `change`; nothing is written.
    /// - `BillingError::Contention` after the retry bound.
    pub fn mutate<F>(&self, account_id: &AccountId, mut change: F) -> Result<Commit>
    where
        F: FnMut(&mut Account) -> Result<Option<LedgerTransaction>>,
    {
        for attempt in 1..=self.max_attempts {
            let current = self.get_account(account_id)?;
            let mut next = current.clone();
            let transaction = change(&mut next)?;

            if transaction.is_none() && next == current {
                return Ok(Commit {
                    account: current,
                    transaction: None,
                    replayed: false,
                });
            }

            next.check_invariants().map_err(|violation| {
                BillingError::InvalidAmount(format!("balance invariant violated: {violation}"))
            })?;
            next.touch(Utc::now());

            match self
                .store
                .commit_account(current.version, &next, transaction.as_ref())
            {
                Ok(()) => {
                    return Ok(Commit {
                        account: next,
                        transaction,
                        replayed: false,
                    })
                }
                Err(StoreError::VersionConflict { expected, actual }) => {
                    debug!(
                        account_id = %account_id,
                        attempt,
                        expected,
                        actual,
                        "Version conflict, retrying"
                    );
                }
                Err(StoreError::DuplicateReference { reference }) => {
                    let existing = self
                        .store
                        .find_transaction_by_reference(&reference)?
                        .ok_or_else(|| {
                            BillingError::Storage(format!("reference {reference} has no transaction"))
                        })?;
                    return self.replayed(account_id, existing);
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(
            account_id = %account_id,
            attempts = self.max_attempts,
            "Gave up on contended account"
        );
        Err(BillingError::Contention {
            account_id: account_id.to_string(),
            attempts: self.max_attempts,
        })
    }

    fn replayed(&self, account_id: &AccountId, existing: LedgerTransaction) -> Result<Commit> {
        Ok(Commit {
            account: self.get_account(account_id)?,
            transaction: Some(existing),
            replayed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FlakyStore;
    use wordmeter_store::MemoryStore;

    fn ledger() -> AccountLedger {
        AccountLedger::new(Arc::new(MemoryStore::new()), PlanCatalog::default())
    }

    fn account_with(
        ledger: &AccountLedger,
        limit: i64,
        used: i64,
        credit: i64,
    ) -> AccountId {
        let id = AccountId::generate();
        ledger.open_account(id).unwrap();
        ledger
            .mutate(&id, |account| {
                account.plan_quota_limit = limit;
                account.plan_quota_used = used;
                account.purchased_credit = credit;
                account.max_purchasable_credit = 1_000_000;
                Ok(None)
            })
            .unwrap();
        id
    }

    #[test]
    fn open_account_twice_is_rejected() {
        let ledger = ledger();
        let id = AccountId::generate();
        ledger.open_account(id).unwrap();
        let err = ledger.open_account(id).unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_EXISTS");
    }

    #[test]
    fn unknown_account_is_not_found() {
        let err = ledger().get_account(&AccountId::generate()).unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_NOT_FOUND");
    }

    #[test]
    fn plan_quota_drains_before_credit() {
        let ledger = ledger();
        let id = account_with(&ledger, 10_000, 9_500, 200);

        let reservation = ledger.reserve_and_commit(&id, 600).unwrap();
        assert_eq!(reservation.from_plan, 500);
        assert_eq!(reservation.from_credit, 100);
        assert_eq!(reservation.available_after, 100);

        let account = ledger.get_account(&id).unwrap();
        assert_eq!(account.plan_quota_used, 10_000);
        assert_eq!(account.purchased_credit, 100);

        let txs = ledger.list_transactions(&id, 10, 0).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].delta_plan_quota, -500);
        assert_eq!(txs[0].delta_purchased_credit, -100);
    }

    #[test]
    fn over_deduction_changes_nothing() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 1_000, 0);
        let before = ledger.get_account(&id).unwrap();

        let err = ledger.reserve_and_commit(&id, 1).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(err.shortfall(), Some(1));

        assert_eq!(ledger.get_account(&id).unwrap(), before);
        assert!(ledger.list_transactions(&id, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn zero_words_is_a_no_op() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 0, 0);
        let before = ledger.get_account(&id).unwrap();

        let reservation = ledger.reserve_and_commit(&id, 0).unwrap();
        assert!(reservation.transaction_id.is_none());
        assert_eq!(reservation.available_after, 1_000);
        assert_eq!(ledger.get_account(&id).unwrap().version, before.version);
    }

    #[test]
    fn negative_words_rejected() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 0, 0);
        let err = ledger.reserve_and_commit(&id, -5).unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[test]
    fn concurrent_reservations_never_overspend() {
        let ledger = Arc::new(ledger().with_max_attempts(1_000));
        let id = account_with(&ledger, 1_000, 0, 500);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.reserve_and_commit(&id, 100))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 15);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.code() == "INSUFFICIENT_BALANCE"));

        let account = ledger.get_account(&id).unwrap();
        assert_eq!(account.plan_quota_used, 1_000);
        assert_eq!(account.purchased_credit, 0);
        assert!(account.check_invariants().is_ok());
    }

    #[test]
    fn refund_returns_words_to_their_pools_once() {
        let ledger = ledger();
        let id = account_with(&ledger, 10_000, 9_500, 200);
        let tx_id = ledger
            .reserve_and_commit(&id, 600)
            .unwrap()
            .transaction_id
            .unwrap();

        let first = ledger.refund(&id, 600, tx_id).unwrap();
        assert!(!first.replayed);
        let account = ledger.get_account(&id).unwrap();
        assert_eq!(account.plan_quota_used, 9_500);
        assert_eq!(account.purchased_credit, 200);

        let second = ledger.refund(&id, 600, tx_id).unwrap();
        assert!(second.replayed);
        assert_eq!(
            second.transaction.unwrap().id,
            first.transaction.unwrap().id
        );
        assert_eq!(ledger.get_account(&id).unwrap().purchased_credit, 200);
    }

    #[test]
    fn partial_refund_returns_credit_first() {
        let ledger = ledger();
        let id = account_with(&ledger, 10_000, 9_500, 200);
        let tx_id = ledger
            .reserve_and_commit(&id, 600)
            .unwrap()
            .transaction_id
            .unwrap();

        let commit = ledger.refund(&id, 150, tx_id).unwrap();
        let tx = commit.transaction.unwrap();
        assert_eq!(tx.delta_purchased_credit, 100);
        assert_eq!(tx.delta_plan_quota, 50);
        assert_eq!(tx.refund_of, Some(tx_id));
    }

    #[test]
    fn refund_cannot_exceed_original() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 0, 0);
        let tx_id = ledger
            .reserve_and_commit(&id, 100)
            .unwrap()
            .transaction_id
            .unwrap();
        let err = ledger.refund(&id, 101, tx_id).unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[test]
    fn refund_of_foreign_transaction_is_not_found() {
        let ledger = ledger();
        let a = account_with(&ledger, 1_000, 0, 0);
        let b = account_with(&ledger, 1_000, 0, 0);
        let tx_id = ledger
            .reserve_and_commit(&a, 10)
            .unwrap()
            .transaction_id
            .unwrap();
        let err = ledger.refund(&b, 10, tx_id).unwrap_err();
        assert_eq!(err.code(), "TRANSACTION_NOT_FOUND");
    }

    #[test]
    fn credit_is_idempotent_per_reference() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 0, 0);

        let first = ledger
            .credit(&id, PaymentPurpose::CreditPurchase, 0, 5_000, "pi_1")
            .unwrap();
        let second = ledger
            .credit(&id, PaymentPurpose::CreditPurchase, 0, 5_000, "pi_1")
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(ledger.get_account(&id).unwrap().purchased_credit, 5_000);
        assert_eq!(ledger.list_transactions(&id, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn credit_respects_tier_cap() {
        let ledger = ledger();
        let id = AccountId::generate();
        let account = ledger.open_account(id).unwrap();

        let err = ledger
            .credit(
                &id,
                PaymentPurpose::CreditPurchase,
                0,
                account.max_purchasable_credit + 1,
                "pi_cap",
            )
            .unwrap_err();
        assert_eq!(err.code(), "CREDIT_CAP_EXCEEDED");
        assert_eq!(ledger.get_account(&id).unwrap().purchased_credit, 0);
    }

    #[test]
    fn oversized_credit_is_capped_not_wrapped() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 0, 100);
        let account = ledger.get_account(&id).unwrap();

        for words in [i64::MAX, i64::MAX - 9] {
            let err = AccountLedger::check_credit_cap(&account, words).unwrap_err();
            assert_eq!(err.code(), "CREDIT_CAP_EXCEEDED");
        }
        let err = ledger
            .credit(&id, PaymentPurpose::CreditPurchase, 0, i64::MAX, "pi_huge")
            .unwrap_err();
        assert_eq!(err.code(), "CREDIT_CAP_EXCEEDED");

        let err = ledger
            .credit(&id, PaymentPurpose::Subscription, i64::MAX, i64::MAX, "pi_both")
            .unwrap_err();
        assert_eq!(err.code(), "CREDIT_CAP_EXCEEDED");
        assert_eq!(ledger.get_account(&id).unwrap().purchased_credit, 100);
    }

    #[test]
    fn plan_credit_overflow_is_invalid_amount() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 0, 0);
        let err = ledger
            .credit(&id, PaymentPurpose::Subscription, i64::MAX, 0, "bonus:huge")
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert_eq!(ledger.get_account(&id).unwrap().plan_quota_limit, 1_000);
    }

    #[test]
    fn plan_credit_raises_cycle_limit() {
        let ledger = ledger();
        let id = account_with(&ledger, 1_000, 1_000, 0);
        ledger
            .credit(&id, PaymentPurpose::Subscription, 500, 0, "bonus:1")
            .unwrap();
        let account = ledger.get_account(&id).unwrap();
        assert_eq!(account.plan_quota_limit, 1_500);
        assert_eq!(account.plan_remaining(), 500);
    }

    #[test]
    fn persistent_conflicts_surface_contention() {
        let store = Arc::new(FlakyStore::new());
        let ledger = AccountLedger::new(store.clone(), PlanCatalog::default()).with_max_attempts(3);
        let id = AccountId::generate();
        ledger.open_account(id).unwrap();

        store.set_always_conflict(true);
        let err = ledger.reserve_and_commit(&id, 10).unwrap_err();
        assert_eq!(err.code(), "CONTENTION");
        assert_eq!(store.commit_attempts(), 3);
    }
}
