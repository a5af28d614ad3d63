//! API handlers.

pub mod accounts;
pub mod admin;
pub mod coupons;
pub mod health;
pub mod payments;
pub mod subscriptions;
pub mod usage;
pub mod webhooks;

/// Default page size for list endpoints.
pub(crate) const fn default_limit() -> usize {
    50
}

/// Largest page a list endpoint returns.
pub(crate) const MAX_PAGE: usize = 100;
