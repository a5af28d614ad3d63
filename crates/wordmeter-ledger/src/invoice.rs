//! Receipt emission.
//!
//! Invoices are a side effect of completed ledger transactions. A failed
//! emission is logged and dropped; it never undoes or fails the transaction.

use std::sync::Arc;

use tracing::{debug, warn};
use wordmeter_core::{AccountId, Invoice, Result};
use wordmeter_store::Store;

/// Sink for receipts.
pub trait InvoiceEmitter: Send + Sync {
    /// Record one receipt.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt could not be recorded.
    fn emit(&self, invoice: &Invoice) -> Result<()>;
}

/// Writes receipts to the store.
pub struct StoreInvoiceEmitter {
    store: Arc<dyn Store>,
}

impl StoreInvoiceEmitter {
    /// Create an emitter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Receipts for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn list(&self, account_id: &AccountId, limit: usize) -> Result<Vec<Invoice>> {
        Ok(self.store.list_invoices_by_account(account_id, limit)?)
    }
}

impl InvoiceEmitter for StoreInvoiceEmitter {
    fn emit(&self, invoice: &Invoice) -> Result<()> {
        self.store.insert_invoice(invoice)?;
        debug!(
            invoice_id = %invoice.id,
            account_id = %invoice.account_id,
            transaction_id = %invoice.transaction_id,
            amount_cents = invoice.amount_cents,
            "Emitted invoice"
        );
        Ok(())
    }
}

/// Emit `invoice`, logging instead of returning a failure.
pub(crate) fn emit_best_effort(emitter: &dyn InvoiceEmitter, invoice: &Invoice) {
    if let Err(e) = emitter.emit(invoice) {
        warn!(
            account_id = %invoice.account_id,
            transaction_id = %invoice.transaction_id,
            error = %e,
            "Failed to emit invoice"
        );
    }
}
