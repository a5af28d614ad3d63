//! Plan tiers and the static plan catalog.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BillingError;

// ============================================================================
// Constants
// ============================================================================

/// Free tier words per cycle.
pub const FREE_QUOTA_WORDS: i64 = 1_000;

/// Pro tier words per cycle.
pub const PRO_QUOTA_WORDS: i64 = 10_000;

/// Premium tier words per cycle.
pub const PREMIUM_QUOTA_WORDS: i64 = 50_000;

/// Pro monthly price in the smallest currency unit.
pub const PRO_PRICE_CENTS: i64 = 299;

/// Premium monthly price in the smallest currency unit.
pub const PREMIUM_PRICE_CENTS: i64 = 799;

/// Purchased words granted per smallest currency unit paid.
pub const CREDIT_WORDS_PER_CENT: i64 = 10;

const MB: i64 = 1024 * 1024;

/// Subscription tiers, ordered from lowest to highest.
///
/// The derived `Ord` is the upgrade order: `Free < Pro < Premium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Default tier every account starts on.
    Free,
    /// Paid tier.
    Pro,
    /// Highest paid tier.
    Premium,
}

impl PlanTier {
    /// Stable lowercase code used on the wire and in payment metadata.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Premium => "premium",
        }
    }

    /// Whether moving from `self` to `target` is a strict upgrade.
    #[must_use]
    pub fn is_upgrade_to(self, target: Self) -> bool {
        target > self
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PlanTier {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" | "plan_pro" => Ok(Self::Pro),
            "premium" | "plan_premium" => Ok(Self::Premium),
            other => Err(BillingError::PlanUnknown {
                code: other.to_string(),
            }),
        }
    }
}

/// Limits and price attached to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Words available per billing cycle.
    pub quota_limit: i64,
    /// Largest single upload accepted, in bytes.
    pub upload_limit_bytes: i64,
    /// Ceiling on the purchased-credit balance.
    pub max_purchasable_credit: i64,
    /// Price per cycle in the smallest currency unit.
    pub price_cents: i64,
}

/// Static tier table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCatalog {
    free: PlanLimits,
    pro: PlanLimits,
    premium: PlanLimits,
    credit_words_per_cent: i64,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            free: PlanLimits {
                quota_limit: FREE_QUOTA_WORDS,
                upload_limit_bytes: 5 * MB,
                max_purchasable_credit: 5_000,
                price_cents: 0,
            },
            pro: PlanLimits {
                quota_limit: PRO_QUOTA_WORDS,
                upload_limit_bytes: 25 * MB,
                max_purchasable_credit: 50_000,
                price_cents: PRO_PRICE_CENTS,
            },
            premium: PlanLimits {
                quota_limit: PREMIUM_QUOTA_WORDS,
                upload_limit_bytes: 100 * MB,
                max_purchasable_credit: 250_000,
                price_cents: PREMIUM_PRICE_CENTS,
            },
            credit_words_per_cent: CREDIT_WORDS_PER_CENT,
        }
    }
}

impl PlanCatalog {
    /// Limits for a tier.
    #[must_use]
    pub const fn limits(&self, tier: PlanTier) -> PlanLimits {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Pro => self.pro,
            PlanTier::Premium => self.premium,
        }
    }

    /// Resolve a plan code and return its limits.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::PlanUnknown` for codes outside the catalog.
    pub fn resolve(&self, code: &str) -> Result<(PlanTier, PlanLimits), BillingError> {
        let tier: PlanTier = code.parse()?;
        Ok((tier, self.limits(tier)))
    }

    /// Words granted for a credit purchase of `amount_cents`.
    #[must_use]
    pub fn words_for_amount(&self, amount_cents: i64) -> i64 {
        amount_cents.saturating_mul(self.credit_words_per_cent)
    }

    /// Price of buying `words` of purchased credit, rounded up.
    #[must_use]
    pub fn amount_for_words(&self, words: i64) -> i64 {
        let rate = self.credit_words_per_cent.max(1);
        words / rate + i64::from(words % rate > 0)
    }
}
