//! In-memory storage implementation.
//!
//! All state sits behind one mutex, so every trait method is a single
//! critical section and the conditional writes are trivially atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use wordmeter_core::{
    Account, AccountId, Coupon, IntentId, IntentStatus, Invoice, InvoiceId, LedgerTransaction,
    PaymentIntent, ReconciliationGap, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::Store;

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, LedgerTransaction>,
    transactions_by_account: HashMap<AccountId, Vec<TransactionId>>,
    references: HashMap<String, TransactionId>,
    intents: BTreeMap<IntentId, PaymentIntent>,
    coupons: HashMap<String, Coupon>,
    invoices: HashMap<InvoiceId, Invoice>,
    invoices_by_account: HashMap<AccountId, Vec<InvoiceId>>,
    gaps: BTreeMap<IntentId, ReconciliationGap>,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::poisoned())
    }
}

fn newest_first<T: Clone, K: std::hash::Hash + Eq>(
    ids: Option<&Vec<K>>,
    records: &HashMap<K, T>,
    limit: usize,
    offset: usize,
) -> Vec<T> {
    ids.map(|ids| {
        ids.iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| records.get(id).cloned())
            .collect()
    })
    .unwrap_or_default()
}

impl Store for MemoryStore {
    fn insert_account(&self, account: &Account) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.accounts.contains_key(&account.account_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }
        inner.accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(account_id).cloned())
    }

    fn commit_account(
        &self,
        expected_version: u64,
        account: &Account,
        transaction: Option<&LedgerTransaction>,
    ) -> Result<()> {
        let mut inner = self.lock()?;

        let actual = inner
            .accounts
            .get(&account.account_id)
            .map(|stored| stored.version)
            .ok_or_else(|| StoreError::NotFound {
                entity: "account",
                id: account.account_id.to_string(),
            })?;
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        if let Some(reference) = transaction.and_then(|tx| tx.external_reference.as_ref()) {
            if inner.references.contains_key(reference) {
                return Err(StoreError::DuplicateReference {
                    reference: reference.clone(),
                });
            }
        }

        inner.accounts.insert(account.account_id, account.clone());
        if let Some(tx) = transaction {
            if let Some(reference) = &tx.external_reference {
                inner.references.insert(reference.clone(), tx.id);
            }
            inner
                .transactions_by_account
                .entry(tx.account_id)
                .or_default()
                .push(tx.id);
            inner.transactions.insert(tx.id, tx.clone());
        }
        Ok(())
    }

    fn list_accounts_due(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        let inner = self.lock()?;
        let mut due: Vec<Account> = inner
            .accounts
            .values()
            .filter(|account| account.is_cycle_expired(now))
            .cloned()
            .collect();
        due.sort_by_key(|account| account.cycle_expires_at);
        Ok(due)
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<LedgerTransaction>> {
        Ok(self.lock()?.transactions.get(transaction_id).cloned())
    }

    fn find_transaction_by_reference(&self, reference: &str) -> Result<Option<LedgerTransaction>> {
        let inner = self.lock()?;
        Ok(inner
            .references
            .get(reference)
            .and_then(|id| inner.transactions.get(id))
            .cloned())
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>> {
        let inner = self.lock()?;
        Ok(newest_first(
            inner.transactions_by_account.get(account_id),
            &inner.transactions,
            limit,
            offset,
        ))
    }

    fn insert_intent(&self, intent: &PaymentIntent) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.intents.contains_key(&intent.id) {
            return Err(StoreError::AlreadyExists {
                entity: "payment intent",
                id: intent.id.to_string(),
            });
        }
        inner.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    fn get_intent(&self, intent_id: &IntentId) -> Result<Option<PaymentIntent>> {
        Ok(self.lock()?.intents.get(intent_id).cloned())
    }

    fn transition_intent(&self, intent: &PaymentIntent, from: IntentStatus) -> Result<bool> {
        let mut inner = self.lock()?;
        let stored = inner
            .intents
            .get_mut(&intent.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "payment intent",
                id: intent.id.to_string(),
            })?;
        if stored.status != from {
            return Ok(false);
        }
        *stored = intent.clone();
        Ok(true)
    }

    fn list_intents_by_status(
        &self,
        status: IntentStatus,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>> {
        let inner = self.lock()?;
        Ok(inner
            .intents
            .values()
            .filter(|intent| intent.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.coupons.contains_key(&coupon.code) {
            return Err(StoreError::AlreadyExists {
                entity: "coupon",
                id: coupon.code.clone(),
            });
        }
        inner.coupons.insert(coupon.code.clone(), coupon.clone());
        Ok(())
    }

    fn get_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.lock()?.coupons.get(code).cloned())
    }

    fn increment_coupon_usage(&self, code: &str) -> Result<Coupon> {
        let mut inner = self.lock()?;
        let coupon = inner
            .coupons
            .get_mut(code)
            .ok_or_else(|| StoreError::NotFound {
                entity: "coupon",
                id: code.to_string(),
            })?;
        if coupon.used_count >= coupon.max_uses {
            return Err(StoreError::CouponExhausted {
                code: code.to_string(),
            });
        }
        coupon.used_count += 1;
        Ok(coupon.clone())
    }

    fn decrement_coupon_usage(&self, code: &str) -> Result<Coupon> {
        let mut inner = self.lock()?;
        let coupon = inner
            .coupons
            .get_mut(code)
            .ok_or_else(|| StoreError::NotFound {
                entity: "coupon",
                id: code.to_string(),
            })?;
        coupon.used_count = coupon.used_count.saturating_sub(1);
        Ok(coupon.clone())
    }

    fn set_coupon_active(&self, code: &str, active: bool) -> Result<Coupon> {
        let mut inner = self.lock()?;
        let coupon = inner
            .coupons
            .get_mut(code)
            .ok_or_else(|| StoreError::NotFound {
                entity: "coupon",
                id: code.to_string(),
            })?;
        coupon.active = active;
        Ok(coupon.clone())
    }

    fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.invoices.contains_key(&invoice.id) {
            return Err(StoreError::AlreadyExists {
                entity: "invoice",
                id: invoice.id.to_string(),
            });
        }
        inner
            .invoices_by_account
            .entry(invoice.account_id)
            .or_default()
            .push(invoice.id);
        inner.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    fn list_invoices_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<Invoice>> {
        let inner = self.lock()?;
        Ok(newest_first(
            inner.invoices_by_account.get(account_id),
            &inner.invoices,
            limit,
            0,
        ))
    }

    fn put_gap(&self, gap: &ReconciliationGap) -> Result<()> {
        self.lock()?.gaps.insert(gap.intent_id, gap.clone());
        Ok(())
    }

    fn get_gap(&self, intent_id: &IntentId) -> Result<Option<ReconciliationGap>> {
        Ok(self.lock()?.gaps.get(intent_id).cloned())
    }

    fn list_open_gaps(&self) -> Result<Vec<ReconciliationGap>> {
        let inner = self.lock()?;
        Ok(inner
            .gaps
            .values()
            .filter(|gap| gap.is_open())
            .cloned()
            .collect())
    }
}
