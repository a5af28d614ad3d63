//! Wordmeter HTTP API Service.
//!
//! This crate exposes the wordmeter ledger over HTTP:
//!
//! - Accounts, balances and transaction history
//! - Word reservation and refund for processing services
//! - Checkout with coupons, and the payment gateway webhook
//! - Admin operations: coupons, renewals, reconciliation gaps
//!
//! # Authentication
//!
//! 1. **HS256 JWT tokens** - for end-user requests
//! 2. **Service API keys** (`X-API-Key`) - for the processing workers
//! 3. **Admin keys** (`X-Admin-Key`) - for operators
//!
//! Settlement webhooks authenticate with an HMAC-SHA256 signature over the body.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers call the synchronous ledger

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
