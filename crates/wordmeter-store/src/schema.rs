//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by account, keyed by `account_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Unique index: external reference → `transaction_id`.
    pub const TRANSACTION_REFS: &str = "transaction_refs";

    /// Payment intents, keyed by `intent_id` (ULID).
    pub const PAYMENT_INTENTS: &str = "payment_intents";

    /// Coupons, keyed by normalized code.
    pub const COUPONS: &str = "coupons";

    /// Invoices, keyed by `invoice_id` (ULID).
    pub const INVOICES: &str = "invoices";

    /// Index: invoices by account, keyed by `account_id || invoice_id`.
    pub const INVOICES_BY_ACCOUNT: &str = "invoices_by_account";

    /// Reconciliation gaps, keyed by `intent_id`.
    pub const RECONCILIATION_GAPS: &str = "reconciliation_gaps";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::TRANSACTION_REFS,
        cf::PAYMENT_INTENTS,
        cf::COUPONS,
        cf::INVOICES,
        cf::INVOICES_BY_ACCOUNT,
        cf::RECONCILIATION_GAPS,
    ]
}
