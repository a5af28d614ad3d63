//! Storage layer for wordmeter.
//!
//! This crate persists accounts, the append-only transaction log, payment
//! intents, coupons, invoices and reconciliation gaps.
//!
//! # Conditional writes
//!
//! Everything that guards a balance goes through a conditional operation that
//! is atomic inside the store:
//!
//! - [`Store::commit_account`] writes an account only if its stored version is
//!   the one the caller read, together with the ledger transaction and its
//!   external-reference index entry.
//! - [`Store::transition_intent`] moves an intent only from the expected status.
//! - [`Store::increment_coupon_usage`] increments only while uses remain.
//!
//! # Backends
//!
//! - [`MemoryStore`]: always available; used by tests and single-node setups.
//! - `RocksStore`: behind the `rocksdb-backend` feature; column families as in
//!   [`schema`](crate::schema).
//!
//! # Example
//!
//! ```
//! use wordmeter_core::{Account, AccountId, PlanCatalog};
//! use wordmeter_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let account = Account::new(AccountId::generate(), &PlanCatalog::default());
//! store.insert_account(&account).unwrap();
//!
//! let retrieved = store.get_account(&account.account_id).unwrap();
//! assert!(retrieved.is_some());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use wordmeter_core::{
    Account, AccountId, Coupon, IntentId, IntentStatus, Invoice, LedgerTransaction,
    PaymentIntent, ReconciliationGap, TransactionId,
};

/// The storage trait defining all database operations.
///
/// Implementations must make each method atomic with respect to the others.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the account id is taken.
    fn insert_account(&self, account: &Account) -> Result<()>;

    /// Get an account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Write `account` if the stored version equals `expected_version`, and
    /// append `transaction` in the same atomic step.
    ///
    /// The caller bumps `account.version` before calling.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::VersionConflict` if another writer got there first.
    /// - `StoreError::DuplicateReference` if the transaction's external
    ///   reference is already recorded. Nothing is written in that case.
    fn commit_account(
        &self,
        expected_version: u64,
        account: &Account,
        transaction: Option<&LedgerTransaction>,
    ) -> Result<()>;

    /// Accounts whose cycle ended at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts_due(&self, now: DateTime<Utc>) -> Result<Vec<Account>>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<LedgerTransaction>>;

    /// Find the transaction recorded under an external reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_transaction_by_reference(&self, reference: &str) -> Result<Option<LedgerTransaction>>;

    /// List transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>>;

    // =========================================================================
    // Payment Intent Operations
    // =========================================================================

    /// Insert a new payment intent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id is taken.
    fn insert_intent(&self, intent: &PaymentIntent) -> Result<()>;

    /// Get a payment intent by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_intent(&self, intent_id: &IntentId) -> Result<Option<PaymentIntent>>;

    /// Replace the stored intent with `intent` only if its stored status is `from`.
    ///
    /// Returns `false` (and writes nothing) when the status has moved on.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the intent doesn't exist.
    fn transition_intent(&self, intent: &PaymentIntent, from: IntentStatus) -> Result<bool>;

    /// List intents with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_intents_by_status(&self, status: IntentStatus, limit: usize)
        -> Result<Vec<PaymentIntent>>;

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    /// Insert a new coupon definition.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the code is taken.
    fn insert_coupon(&self, coupon: &Coupon) -> Result<()>;

    /// Get a coupon by normalized code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_coupon(&self, code: &str) -> Result<Option<Coupon>>;

    /// `used_count = used_count + 1 WHERE used_count < max_uses`, atomically.
    ///
    /// Returns the coupon after the increment.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the coupon doesn't exist.
    /// - `StoreError::CouponExhausted` if no uses remain.
    fn increment_coupon_usage(&self, code: &str) -> Result<Coupon>;

    /// Give back one use after a redemption whose grant failed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the coupon doesn't exist.
    fn decrement_coupon_usage(&self, code: &str) -> Result<Coupon>;

    /// Enable or disable a coupon without touching its usage count.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the coupon doesn't exist.
    fn set_coupon_active(&self, code: &str, active: bool) -> Result<Coupon>;

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    /// Insert an invoice. Invoices are immutable once written.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id is taken.
    fn insert_invoice(&self, invoice: &Invoice) -> Result<()>;

    /// List invoices for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_invoices_by_account(&self, account_id: &AccountId, limit: usize)
        -> Result<Vec<Invoice>>;

    // =========================================================================
    // Reconciliation Gap Operations
    // =========================================================================

    /// Insert or replace the gap record for an intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_gap(&self, gap: &ReconciliationGap) -> Result<()>;

    /// Get the gap record for an intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_gap(&self, intent_id: &IntentId) -> Result<Option<ReconciliationGap>>;

    /// List unresolved gaps, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_open_gaps(&self) -> Result<Vec<ReconciliationGap>>;
}
