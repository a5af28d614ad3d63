//! A store wrapper with injectable failures.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use wordmeter_core::{
    Account, AccountId, Coupon, IntentId, IntentStatus, Invoice, LedgerTransaction,
    PaymentIntent, ReconciliationGap, TransactionId,
};
use wordmeter_store::{MemoryStore, Result, Store, StoreError};

/// Delegates to a `MemoryStore`, except where told to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_commits: AtomicBool,
    always_conflict: AtomicBool,
    fail_invoices: AtomicBool,
    fail_gap_reads: AtomicBool,
    commit_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every account commit fail with a database error.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every account commit lose the version check.
    pub fn set_always_conflict(&self, conflict: bool) {
        self.always_conflict.store(conflict, Ordering::SeqCst);
    }

    /// Make invoice inserts fail.
    pub fn set_fail_invoices(&self, fail: bool) {
        self.fail_invoices.store(fail, Ordering::SeqCst);
    }

    /// Make gap lookups fail.
    pub fn set_fail_gap_reads(&self, fail: bool) {
        self.fail_gap_reads.store(fail, Ordering::SeqCst);
    }

    pub fn commit_attempts(&self) -> u32 {
        self.commit_attempts.load(Ordering::SeqCst)
    }
}

impl Store for FlakyStore {
    fn insert_account(&self, account: &Account) -> Result<()> {
        self.inner.insert_account(account)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.inner.get_account(account_id)
    }

    fn commit_account(
        &self,
        expected_version: u64,
        account: &Account,
        transaction: Option<&LedgerTransaction>,
    ) -> Result<()> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected commit failure".into()));
        }
        if self.always_conflict.load(Ordering::SeqCst) {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: expected_version + 1,
            });
        }
        self.inner.commit_account(expected_version, account, transaction)
    }

    fn list_accounts_due(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        self.inner.list_accounts_due(now)
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<LedgerTransaction>> {
        self.inner.get_transaction(transaction_id)
    }

    fn find_transaction_by_reference(&self, reference: &str) -> Result<Option<LedgerTransaction>> {
        self.inner.find_transaction_by_reference(reference)
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>> {
        self.inner
            .list_transactions_by_account(account_id, limit, offset)
    }

    fn insert_intent(&self, intent: &PaymentIntent) -> Result<()> {
        self.inner.insert_intent(intent)
    }

    fn get_intent(&self, intent_id: &IntentId) -> Result<Option<PaymentIntent>> {
        self.inner.get_intent(intent_id)
    }

    fn transition_intent(&self, intent: &PaymentIntent, from: IntentStatus) -> Result<bool> {
        self.inner.transition_intent(intent, from)
    }

    fn list_intents_by_status(
        &self,
        status: IntentStatus,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>> {
        self.inner.list_intents_by_status(status, limit)
    }

    fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.inner.insert_coupon(coupon)
    }

    fn get_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        self.inner.get_coupon(code)
    }

    fn increment_coupon_usage(&self, code: &str) -> Result<Coupon> {
        self.inner.increment_coupon_usage(code)
    }

    fn decrement_coupon_usage(&self, code: &str) -> Result<Coupon> {
        self.inner.decrement_coupon_usage(code)
    }

    fn set_coupon_active(&self, code: &str, active: bool) -> Result<Coupon> {
        self.inner.set_coupon_active(code, active)
    }

    fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        if self.fail_invoices.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected invoice failure".into()));
        }
        self.inner.insert_invoice(invoice)
    }

    fn list_invoices_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<Invoice>> {
        self.inner.list_invoices_by_account(account_id, limit)
    }

    fn put_gap(&self, gap: &ReconciliationGap) -> Result<()> {
        self.inner.put_gap(gap)
    }

    fn get_gap(&self, intent_id: &IntentId) -> Result<Option<ReconciliationGap>> {
        if self.fail_gap_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected gap read failure".into()));
        }
        self.inner.get_gap(intent_id)
    }

    fn list_open_gaps(&self) -> Result<Vec<ReconciliationGap>> {
        self.inner.list_open_gaps()
    }
}
