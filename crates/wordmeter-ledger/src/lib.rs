//! Balance ledger and payment flows for wordmeter.
//!
//! Every component here sits on a [`wordmeter_store::Store`] and talks to it
//! only through conditional writes, so any number of handlers can share one
//! engine without an in-process lock around an account.
//!
//! - [`AccountLedger`]: reserve, refund and credit words
//! - [`PaymentReconciler`]: intents, signed settlements and reconciliation gaps
//! - [`CouponRedeemer`]: validation and capped redemption of discount codes
//! - [`SubscriptionLifecycleManager`]: activation, renewal and expiry
//! - [`StoreInvoiceEmitter`]: best-effort receipts
//! - [`BillingEngine`]: wires the above over one store and owns checkout
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wordmeter_core::AccountId;
//! use wordmeter_ledger::{BillingEngine, EngineConfig};
//! use wordmeter_store::MemoryStore;
//!
//! let engine = BillingEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
//! let account_id = AccountId::generate();
//! engine.ledger().open_account(account_id).unwrap();
//!
//! let reservation = engine.ledger().reserve_and_commit(&account_id, 300).unwrap();
//! assert_eq!(reservation.from_plan, 300);
//! assert_eq!(reservation.available_after, 700);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod coupons;
pub mod crypto;
pub mod engine;
pub mod invoice;
pub mod ledger;
pub mod reconciler;
pub mod subscription;

#[cfg(test)]
mod test_support;

pub use coupons::CouponRedeemer;
pub use engine::{BillingEngine, CheckoutOutcome, EngineConfig};
pub use invoice::{InvoiceEmitter, StoreInvoiceEmitter};
pub use ledger::{AccountLedger, Commit, Reservation, DEFAULT_MAX_ATTEMPTS};
pub use reconciler::PaymentReconciler;
pub use subscription::{LapsedPlan, RenewalReport, SubscriptionLifecycleManager};
