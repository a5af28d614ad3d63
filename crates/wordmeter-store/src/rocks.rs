//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Conditional writes read, check and write under `write_lock`, and every
//! multi-record write lands as a single `WriteBatch`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use wordmeter_core::{
    Account, AccountId, Coupon, IntentId, IntentStatus, Invoice, InvoiceId, LedgerTransaction,
    PaymentIntent, ReconciliationGap, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors).map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| StoreError::poisoned())
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db.put_cf(&cf, key, value).map_err(db_err)
    }

    /// Decode every value in a column family, in key order.
    fn scan<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(db_err)?;
            values.push(Self::deserialize(&value)?);
        }
        Ok(values)
    }

    /// Collect the trailing ULIDs of an account-scoped index, oldest first.
    fn index_ids(&self, cf_name: &str, account_id: &AccountId) -> Result<Vec<[u8; 16]>> {
        let cf = self.cf(cf_name)?;
        let prefix = keys::account_prefix(account_id);
        let mut ids = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(keys::extract_ulid_from_index_key(&key)?);
        }
        Ok(ids)
    }

    fn update_coupon<F>(&self, code: &str, apply: F) -> Result<Coupon>
    where
        F: FnOnce(&mut Coupon) -> Result<()>,
    {
        let _guard = self.lock()?;
        let key = keys::coupon_key(code);
        let mut coupon: Coupon =
            self.get_value(cf::COUPONS, &key)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "coupon",
                    id: code.to_string(),
                })?;
        apply(&mut coupon)?;
        self.put_value(cf::COUPONS, &key, &coupon)?;
        Ok(coupon)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn insert_account(&self, account: &Account) -> Result<()> {
        let _guard = self.lock()?;
        let key = keys::account_key(&account.account_id);
        if self.get_value::<Account>(cf::ACCOUNTS, &key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }
        self.put_value(cf::ACCOUNTS, &key, account)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn commit_account(
        &self,
        expected_version: u64,
        account: &Account,
        transaction: Option<&LedgerTransaction>,
    ) -> Result<()> {
        let _guard = self.lock()?;

        let account_key = keys::account_key(&account.account_id);
        let stored: Account =
            self.get_value(cf::ACCOUNTS, &account_key)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "account",
                    id: account.account_id.to_string(),
                })?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: stored.version,
            });
        }

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, &account_key, Self::serialize(account)?);

        if let Some(tx) = transaction {
            let cf_tx = self.cf(cf::TRANSACTIONS)?;
            let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
            let tx_key = keys::transaction_key(&tx.id);

            if let Some(reference) = &tx.external_reference {
                let cf_refs = self.cf(cf::TRANSACTION_REFS)?;
                let ref_key = keys::reference_key(reference);
                if self.db.get_cf(&cf_refs, &ref_key).map_err(db_err)?.is_some() {
                    return Err(StoreError::DuplicateReference {
                        reference: reference.clone(),
                    });
                }
                batch.put_cf(&cf_refs, &ref_key, &tx_key);
            }

            batch.put_cf(&cf_tx, &tx_key, Self::serialize(tx)?);
            batch.put_cf(
                &cf_by_account,
                keys::account_index_key(&tx.account_id, tx.id.to_bytes()),
                [],
            );
        }

        self.db.write(batch).map_err(db_err)
    }

    fn list_accounts_due(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        let mut due: Vec<Account> = self
            .scan::<Account>(cf::ACCOUNTS)?
            .into_iter()
            .filter(|account| account.is_cycle_expired(now))
            .collect();
        due.sort_by_key(|account| account.cycle_expires_at);
        Ok(due)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<LedgerTransaction>> {
        self.get_value(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    fn find_transaction_by_reference(&self, reference: &str) -> Result<Option<LedgerTransaction>> {
        let cf_refs = self.cf(cf::TRANSACTION_REFS)?;
        let Some(tx_key) = self
            .db
            .get_cf(&cf_refs, keys::reference_key(reference))
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        self.get_value(cf::TRANSACTIONS, &tx_key)
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>> {
        let ids = self.index_ids(cf::TRANSACTIONS_BY_ACCOUNT, account_id)?;
        let mut transactions = Vec::new();
        for bytes in ids.into_iter().rev().skip(offset).take(limit) {
            if let Some(tx) = self.get_transaction(&TransactionId::from_bytes(bytes))? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    // =========================================================================
    // Payment Intent Operations
    // =========================================================================

    fn insert_intent(&self, intent: &PaymentIntent) -> Result<()> {
        let _guard = self.lock()?;
        let key = keys::intent_key(&intent.id);
        if self.get_value::<PaymentIntent>(cf::PAYMENT_INTENTS, &key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "payment intent",
                id: intent.id.to_string(),
            });
        }
        self.put_value(cf::PAYMENT_INTENTS, &key, intent)
    }

    fn get_intent(&self, intent_id: &IntentId) -> Result<Option<PaymentIntent>> {
        self.get_value(cf::PAYMENT_INTENTS, &keys::intent_key(intent_id))
    }

    fn transition_intent(&self, intent: &PaymentIntent, from: IntentStatus) -> Result<bool> {
        let _guard = self.lock()?;
        let key = keys::intent_key(&intent.id);
        let stored: PaymentIntent =
            self.get_value(cf::PAYMENT_INTENTS, &key)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "payment intent",
                    id: intent.id.to_string(),
                })?;
        if stored.status != from {
            return Ok(false);
        }
        self.put_value(cf::PAYMENT_INTENTS, &key, intent)?;
        Ok(true)
    }

    fn list_intents_by_status(
        &self,
        status: IntentStatus,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>> {
        Ok(self
            .scan::<PaymentIntent>(cf::PAYMENT_INTENTS)?
            .into_iter()
            .filter(|intent| intent.status == status)
            .take(limit)
            .collect())
    }

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let _guard = self.lock()?;
        let key = keys::coupon_key(&coupon.code);
        if self.get_value::<Coupon>(cf::COUPONS, &key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "coupon",
                id: coupon.code.clone(),
            });
        }
        self.put_value(cf::COUPONS, &key, coupon)
    }

    fn get_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        self.get_value(cf::COUPONS, &keys::coupon_key(code))
    }

    fn increment_coupon_usage(&self, code: &str) -> Result<Coupon> {
        self.update_coupon(code, |coupon| {
            if coupon.used_count >= coupon.max_uses {
                return Err(StoreError::CouponExhausted {
                    code: coupon.code.clone(),
                });
            }
            coupon.used_count += 1;
            Ok(())
        })
    }

    fn decrement_coupon_usage(&self, code: &str) -> Result<Coupon> {
        self.update_coupon(code, |coupon| {
            coupon.used_count = coupon.used_count.saturating_sub(1);
            Ok(())
        })
    }

    fn set_coupon_active(&self, code: &str, active: bool) -> Result<Coupon> {
        self.update_coupon(code, |coupon| {
            coupon.active = active;
            Ok(())
        })
    }

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let _guard = self.lock()?;
        let cf_invoices = self.cf(cf::INVOICES)?;
        let cf_by_account = self.cf(cf::INVOICES_BY_ACCOUNT)?;
        let key = keys::invoice_key(&invoice.id);

        if self.db.get_cf(&cf_invoices, &key).map_err(db_err)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "invoice",
                id: invoice.id.to_string(),
            });
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_invoices, &key, Self::serialize(invoice)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_index_key(&invoice.account_id, invoice.id.to_bytes()),
            [],
        );
        self.db.write(batch).map_err(db_err)
    }

    fn list_invoices_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<Invoice>> {
        let ids = self.index_ids(cf::INVOICES_BY_ACCOUNT, account_id)?;
        let mut invoices = Vec::new();
        for bytes in ids.into_iter().rev().take(limit) {
            let key = keys::invoice_key(&InvoiceId::from_bytes(bytes));
            if let Some(invoice) = self.get_value(cf::INVOICES, &key)? {
                invoices.push(invoice);
            }
        }
        Ok(invoices)
    }

    // =========================================================================
    // Reconciliation Gap Operations
    // =========================================================================

    fn put_gap(&self, gap: &ReconciliationGap) -> Result<()> {
        let _guard = self.lock()?;
        self.put_value(cf::RECONCILIATION_GAPS, &keys::intent_key(&gap.intent_id), gap)
    }

    fn get_gap(&self, intent_id: &IntentId) -> Result<Option<ReconciliationGap>> {
        self.get_value(cf::RECONCILIATION_GAPS, &keys::intent_key(intent_id))
    }

    fn list_open_gaps(&self) -> Result<Vec<ReconciliationGap>> {
        Ok(self
            .scan::<ReconciliationGap>(cf::RECONCILIATION_GAPS)?
            .into_iter()
            .filter(ReconciliationGap::is_open)
            .collect())
    }
}
