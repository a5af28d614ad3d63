//! Discount coupons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;
use crate::payment::PaymentPurpose;

/// How a coupon's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is a percentage (0 to 100).
    Percentage,
    /// `discount_value` is an absolute amount in the smallest currency unit.
    Fixed,
}

/// Which purchases a coupon applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponPurpose {
    /// Plan activations only.
    Subscription,
    /// Credit purchases only.
    Credit,
    /// Any purchase.
    Both,
}

impl CouponPurpose {
    /// Whether a coupon scoped to `self` covers `purpose`.
    #[must_use]
    pub const fn covers(&self, purpose: PaymentPurpose) -> bool {
        matches!(
            (self, purpose),
            (Self::Both, _)
                | (Self::Subscription, PaymentPurpose::Subscription)
                | (Self::Credit, PaymentPurpose::CreditPurchase)
        )
    }
}

/// A discount code with a bounded number of uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Unique code, stored uppercase.
    pub code: String,
    /// Percentage or fixed.
    pub discount_type: DiscountType,
    /// Percent or amount, depending on `discount_type`.
    pub discount_value: i64,
    /// Total redemptions allowed.
    pub max_uses: u32,
    /// Redemptions so far.
    pub used_count: u32,
    /// End of validity.
    pub expires_at: Option<DateTime<Utc>>,
    /// Purchases it applies to.
    pub applicable_purpose: CouponPurpose,
    /// Disabled coupons never validate.
    pub active: bool,
    /// When the coupon was created.
    pub created_at: DateTime<Utc>,
}

/// Discount preview for a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponQuote {
    /// The coupon code.
    pub code: String,
    /// Always true for a returned quote; kept for API symmetry.
    pub valid: bool,
    /// Amount taken off.
    pub discount_cents: i64,
    /// Amount left to pay.
    pub final_amount_cents: i64,
}

impl Coupon {
    /// Create an active coupon with no uses.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` for a negative value or a percentage above 100.
    pub fn new(
        code: &str,
        discount_type: DiscountType,
        discount_value: i64,
        max_uses: u32,
        applicable_purpose: CouponPurpose,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, BillingError> {
        if discount_value < 0
            || (discount_type == DiscountType::Percentage && discount_value > 100)
        {
            return Err(BillingError::InvalidAmount(format!(
                "discount value {discount_value} out of range for {discount_type:?}"
            )));
        }
        Ok(Self {
            code: normalize_code(code),
            discount_type,
            discount_value,
            max_uses,
            used_count: 0,
            expires_at,
            applicable_purpose,
            active: true,
            created_at: Utc::now(),
        })
    }

    /// Uses left.
    #[must_use]
    pub const fn remaining_uses(&self) -> u32 {
        self.max_uses.saturating_sub(self.used_count)
    }

    /// Discount on `amount_cents`, capped at the amount.
    #[must_use]
    pub fn discount_for(&self, amount_cents: i64) -> i64 {
        let raw = match self.discount_type {
            DiscountType::Percentage => amount_cents.saturating_mul(self.discount_value) / 100,
            DiscountType::Fixed => self.discount_value,
        };
        raw.min(amount_cents).max(0)
    }

    /// Validate the coupon for a purchase and compute the discount. Read-only.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidCoupon` when inactive or scoped to another purpose.
    /// - `BillingError::CouponExpired` past `expires_at`.
    /// - `BillingError::CouponExhausted` when no uses remain.
    /// - `BillingError::InvalidAmount` for a negative amount.
    pub fn quote(
        &self,
        purpose: PaymentPurpose,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, BillingError> {
        if amount_cents < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "negative purchase amount: {amount_cents}"
            )));
        }
        if !self.active {
            return Err(BillingError::InvalidCoupon {
                code: self.code.clone(),
                reason: "coupon is not active".into(),
            });
        }
        if self.expires_at.is_some_and(|at| at <= now) {
            return Err(BillingError::CouponExpired {
                code: self.code.clone(),
            });
        }
        if self.used_count >= self.max_uses {
            return Err(BillingError::CouponExhausted {
                code: self.code.clone(),
            });
        }
        if !self.applicable_purpose.covers(purpose) {
            return Err(BillingError::InvalidCoupon {
                code: self.code.clone(),
                reason: format!("coupon does not apply to {purpose:?} purchases"),
            });
        }

        let discount_cents = self.discount_for(amount_cents);
        Ok(CouponQuote {
            code: self.code.clone(),
            valid: true,
            discount_cents,
            final_amount_cents: amount_cents - discount_cents,
        })
    }
}

/// Canonical form of a user-entered code.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
