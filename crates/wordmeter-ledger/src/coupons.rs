//! Coupon validation and redemption.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use wordmeter_core::{
    normalize_code, BillingError, Coupon, CouponQuote, PaymentPurpose, Result,
};
use wordmeter_store::{Store, StoreError};

/// Validates and redeems discount codes.
pub struct CouponRedeemer {
    store: Arc<dyn Store>,
}

fn unknown(code: &str) -> BillingError {
    BillingError::InvalidCoupon {
        code: code.to_string(),
        reason: "unknown coupon".into(),
    }
}

impl CouponRedeemer {
    /// Create a redeemer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a new coupon.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidCoupon` if the code is already taken.
    pub fn create(&self, coupon: Coupon) -> Result<Coupon> {
        match self.store.insert_coupon(&coupon) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                return Err(BillingError::InvalidCoupon {
                    code: coupon.code,
                    reason: "code already exists".into(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            code = %coupon.code,
            max_uses = coupon.max_uses,
            discount_type = ?coupon.discount_type,
            discount_value = coupon.discount_value,
            "Created coupon"
        );
        Ok(coupon)
    }

    /// Disable a coupon. Past redemptions are unaffected.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidCoupon` for an unknown code.
    pub fn deactivate(&self, code: &str) -> Result<Coupon> {
        let code = normalize_code(code);
        let coupon = self
            .store
            .set_coupon_active(&code, false)
            .map_err(|e| Self::map_store_error(&code, e))?;
        info!(code = %code, "Deactivated coupon");
        Ok(coupon)
    }

    /// Look a coupon up by code.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidCoupon` for an unknown code.
    pub fn get(&self, code: &str) -> Result<Coupon> {
        let code = normalize_code(code);
        self.store.get_coupon(&code)?.ok_or_else(|| unknown(&code))
    }

    /// Check a coupon against a purchase and compute the discount. Read-only.
    ///
    /// # Errors
    ///
    /// `INVALID_COUPON`, `COUPON_EXPIRED` or `COUPON_EXHAUSTED` as the coupon's
    /// state dictates.
    pub fn validate(
        &self,
        code: &str,
        purpose: PaymentPurpose,
        amount_cents: i64,
    ) -> Result<CouponQuote> {
        self.get(code)?.quote(purpose, amount_cents, Utc::now())
    }

    /// Consume one use with a single conditional increment.
    ///
    /// # Errors
    ///
    /// - `BillingError::CouponExhausted` when no uses remain.
    /// - `BillingError::InvalidCoupon` for an unknown code.
    pub fn redeem(&self, code: &str) -> Result<Coupon> {
        let code = normalize_code(code);
        let coupon = self
            .store
            .increment_coupon_usage(&code)
            .map_err(|e| Self::map_store_error(&code, e))?;
        info!(
            code = %code,
            used = coupon.used_count,
            max_uses = coupon.max_uses,
            "Redeemed coupon"
        );
        Ok(coupon)
    }

    /// Validate then redeem, returning the quote the redemption was made for.
    ///
    /// # Errors
    ///
    /// Same as [`validate`](Self::validate) and [`redeem`](Self::redeem).
    pub fn redeem_for(
        &self,
        code: &str,
        purpose: PaymentPurpose,
        amount_cents: i64,
    ) -> Result<CouponQuote> {
        let quote = self.validate(code, purpose, amount_cents)?;
        self.redeem(&quote.code)?;
        Ok(quote)
    }

    /// Give back a use whose grant did not complete.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidCoupon` for an unknown code.
    pub fn release(&self, code: &str) -> Result<Coupon> {
        let code = normalize_code(code);
        let coupon = self
            .store
            .decrement_coupon_usage(&code)
            .map_err(|e| Self::map_store_error(&code, e))?;
        warn!(code = %code, used = coupon.used_count, "Released coupon use");
        Ok(coupon)
    }

    fn map_store_error(code: &str, err: StoreError) -> BillingError {
        match err {
            StoreError::NotFound { .. } => unknown(code),
            other => other.into(),
        }
    }
}
