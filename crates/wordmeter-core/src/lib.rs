//! Core types and pure logic for wordmeter.
//!
//! This crate provides the foundational types used throughout the wordmeter ledger:
//!
//! - **Identifiers**: `AccountId`, `TransactionId`, `IntentId`, `InvoiceId`
//! - **Plans**: `PlanTier`, `PlanCatalog`, `PlanLimits`
//! - **Accounts**: `Account`, `SubscriptionState`
//! - **Deduction**: `compute_deduction`, `Deduction`
//! - **Ledger**: `LedgerTransaction`, `TransactionReason`
//! - **Payments**: `PaymentIntent`, `Grant`, `SettlementPayload`, `ReconciliationGap`
//! - **Coupons**: `Coupon`, `CouponQuote`
//! - **Receipts**: `Invoice`
//!
//! # Word units
//!
//! Balances are counted in words and stored as `i64`. Money amounts are `i64`
//! in the smallest currency unit (cents), never floating point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod coupon;
pub mod deduction;
pub mod error;
pub mod ids;
pub mod invoice;
pub mod payment;
pub mod plan;
pub mod transaction;

pub use account::{Account, SubscriptionState, DEFAULT_CYCLE_DAYS};
pub use coupon::{normalize_code, Coupon, CouponPurpose, CouponQuote, DiscountType};
pub use deduction::{compute_deduction, Deduction};
pub use error::{BillingError, Result};
pub use ids::{AccountId, IdError, IntentId, InvoiceId, TransactionId};
pub use invoice::Invoice;
pub use payment::{
    Grant, IntentStatus, PaymentIntent, PaymentPurpose, ReconciliationGap, SettlementOutcome,
    SettlementPayload, SettlementStatus,
};
pub use plan::{
    PlanCatalog, PlanLimits, PlanTier, CREDIT_WORDS_PER_CENT, FREE_QUOTA_WORDS,
    PREMIUM_PRICE_CENTS, PREMIUM_QUOTA_WORDS, PRO_PRICE_CENTS, PRO_QUOTA_WORDS,
};
pub use transaction::{LedgerTransaction, TransactionReason};
