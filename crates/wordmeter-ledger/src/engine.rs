//! Wiring and checkout.
//!
//! [`BillingEngine`] builds every component over one store and owns the
//! checkout flow: price the grant, apply an optional coupon, then either open
//! a payment intent or, when the coupon covers the whole price, grant directly.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wordmeter_core::{
    normalize_code, AccountId, BillingError, Grant, Invoice, LedgerTransaction, PaymentIntent,
    PaymentPurpose, PlanCatalog, Result, DEFAULT_CYCLE_DAYS,
};
use wordmeter_store::Store;

use crate::coupons::CouponRedeemer;
use crate::invoice::{emit_best_effort, InvoiceEmitter, StoreInvoiceEmitter};
use crate::ledger::{AccountLedger, Commit, DEFAULT_MAX_ATTEMPTS};
use crate::reconciler::PaymentReconciler;
use crate::subscription::{RenewalReport, SubscriptionLifecycleManager};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tier table.
    pub catalog: PlanCatalog,
    /// Billing cycle length.
    pub cycle_length: Duration,
    /// Shared secret for settlement signatures.
    pub webhook_secret: String,
    /// Currency for prices and receipts.
    pub currency: String,
    /// Conditional-write retry bound.
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog: PlanCatalog::default(),
            cycle_length: Duration::days(DEFAULT_CYCLE_DAYS),
            webhook_secret: String::new(),
            currency: "USD".into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Result of a checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// The user must pay this intent at the gateway.
    PaymentRequired {
        /// The pending intent.
        intent: PaymentIntent,
    },
    /// A coupon covered the full price; the grant is applied.
    Granted {
        /// The ledger transaction written.
        transaction: LedgerTransaction,
        /// The coupon that paid for it.
        coupon_code: String,
        /// Discount applied.
        discount_cents: i64,
    },
}

/// All ledger components over one store.
pub struct BillingEngine {
    config: EngineConfig,
    ledger: Arc<AccountLedger>,
    coupons: Arc<CouponRedeemer>,
    subscriptions: Arc<SubscriptionLifecycleManager>,
    reconciler: Arc<PaymentReconciler>,
    invoices: Arc<StoreInvoiceEmitter>,
}

impl BillingEngine {
    /// Build the components over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let ledger = Arc::new(
            AccountLedger::new(Arc::clone(&store), config.catalog.clone())
                .with_max_attempts(config.max_attempts),
        );
        let invoices = Arc::new(StoreInvoiceEmitter::new(Arc::clone(&store)));
        let emitter: Arc<dyn InvoiceEmitter> = invoices.clone();
        let coupons = Arc::new(CouponRedeemer::new(store));
        let subscriptions = Arc::new(
            SubscriptionLifecycleManager::new(Arc::clone(&ledger))
                .with_cycle_length(config.cycle_length),
        );
        let reconciler = Arc::new(PaymentReconciler::new(
            Arc::clone(&ledger),
            Arc::clone(&subscriptions),
            Arc::clone(&coupons),
            emitter,
            config.webhook_secret.clone(),
        ));
        Self {
            config,
            ledger,
            coupons,
            subscriptions,
            reconciler,
            invoices,
        }
    }

    /// The account ledger.
    #[must_use]
    pub fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    /// The coupon redeemer.
    #[must_use]
    pub fn coupons(&self) -> &CouponRedeemer {
        &self.coupons
    }

    /// The subscription lifecycle manager.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionLifecycleManager {
        &self.subscriptions
    }

    /// The payment reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &PaymentReconciler {
        &self.reconciler
    }

    /// The receipt store.
    #[must_use]
    pub fn invoices(&self) -> &StoreInvoiceEmitter {
        &self.invoices
    }

    /// The plan catalog.
    #[must_use]
    pub const fn catalog(&self) -> &PlanCatalog {
        &self.config.catalog
    }

    /// List price of a grant.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidPlanTransition` for the free tier, which isn't sold.
    /// - `BillingError::InvalidAmount` for a non-positive credit size.
    pub fn price(&self, grant: Grant) -> Result<i64> {
        match grant {
            Grant::Plan { tier } => {
                let price = self.config.catalog.limits(tier).price_cents;
                if price <= 0 {
                    return Err(BillingError::InvalidPlanTransition { from: tier, to: tier });
                }
                Ok(price)
            }
            Grant::Credit { words } if words > 0 => Ok(self.config.catalog.amount_for_words(words)),
            Grant::Credit { words } => Err(BillingError::InvalidAmount(format!(
                "credit purchase of {words} words"
            ))),
        }
    }

    /// Start a purchase, optionally discounted by a coupon.
    ///
    /// With a coupon, the use is redeemed up front. A coupon that brings the
    /// price to zero grants immediately under the reference
    /// `coupon:{CODE}:{account_id}`, so each account redeems a given coupon
    /// once; otherwise a discounted intent is opened. Any failure after the
    /// redemption releases the use.
    ///
    /// # Errors
    ///
    /// - Coupon errors from validation or redemption.
    /// - `BillingError::FreeGrantRequiresCoupon` for a zero price without a coupon.
    /// - Grant checks (`DOWNGRADE_BLOCKED`, `CREDIT_CAP_EXCEEDED`, ...).
    pub fn checkout(
        &self,
        account_id: &AccountId,
        grant: Grant,
        coupon_code: Option<&str>,
    ) -> Result<CheckoutOutcome> {
        let amount = self.price(grant)?;
        let currency = self.config.currency.as_str();

        let Some(code) = coupon_code.map(normalize_code) else {
            let intent = self
                .reconciler
                .create_intent(account_id, grant, amount, currency)?;
            return Ok(CheckoutOutcome::PaymentRequired { intent });
        };

        let purpose = grant.purpose();
        let quote = self.coupons.validate(&code, purpose, amount)?;
        self.reconciler.check_grant(account_id, grant)?;

        let reference = Self::coupon_reference(&code, account_id);
        if quote.final_amount_cents == 0
            && self
                .ledger
                .store()
                .find_transaction_by_reference(&reference)?
                .is_some()
        {
            return Err(Self::already_redeemed(&code));
        }

        self.coupons.redeem(&code)?;

        let result = if quote.final_amount_cents == 0 {
            self.free_grant(account_id, grant, &reference)
                .and_then(|commit| {
                    if commit.replayed {
                        return Err(Self::already_redeemed(&code));
                    }
                    commit.into_transaction()
                })
                .map(|transaction| {
                    info!(
                        account_id = %account_id,
                        code = %code,
                        discount_cents = quote.discount_cents,
                        "Granted purchase with coupon"
                    );
                    emit_best_effort(
                        self.invoices.as_ref(),
                        &Invoice::for_transaction(&transaction, 0, currency)
                            .with_coupon(Some(code.clone()), quote.discount_cents),
                    );
                    CheckoutOutcome::Granted {
                        transaction,
                        coupon_code: code.clone(),
                        discount_cents: quote.discount_cents,
                    }
                })
        } else {
            self.reconciler
                .create_discounted_intent(account_id, grant, &quote, currency)
                .map(|intent| CheckoutOutcome::PaymentRequired { intent })
        };

        if let Err(e) = &result {
            warn!(
                account_id = %account_id,
                code = %code,
                purpose = ?purpose,
                error = %e,
                "Checkout failed after coupon redemption"
            );
            if let Err(release_err) = self.coupons.release(&code) {
                warn!(code = %code, error = %release_err, "Failed to release coupon");
            }
        }
        result
    }

    /// Run the renewal sweep and bill the plans that asked to renew.
    ///
    /// Each lapsed auto-renew plan gets a full-price intent for its old tier.
    /// The tier comes back, with a receipt, only when that intent settles.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due list cannot be read.
    pub fn process_due(&self, now: DateTime<Utc>) -> Result<RenewalReport> {
        let mut report = self.subscriptions.process_due(now)?;

        for lapsed in &report.awaiting_payment {
            let grant = Grant::Plan { tier: lapsed.tier };
            let opened = self.price(grant).and_then(|amount| {
                self.reconciler.create_intent(
                    &lapsed.account_id,
                    grant,
                    amount,
                    &self.config.currency,
                )
            });
            match opened {
                Ok(intent) => {
                    info!(
                        account_id = %lapsed.account_id,
                        tier = %lapsed.tier,
                        intent_id = %intent.id,
                        "Opened renewal intent"
                    );
                    report.renewal_intents.push(intent.id);
                }
                Err(e) => warn!(
                    account_id = %lapsed.account_id,
                    tier = %lapsed.tier,
                    error = %e,
                    "Failed to open renewal intent"
                ),
            }
        }
        Ok(report)
    }

    fn free_grant(&self, account_id: &AccountId, grant: Grant, reference: &str) -> Result<Commit> {
        match grant {
            Grant::Credit { words } => self.ledger.credit(
                account_id,
                PaymentPurpose::CreditPurchase,
                0,
                words,
                reference,
            ),
            Grant::Plan { tier } => self.subscriptions.activate_with_reference(
                account_id,
                tier,
                self.config.cycle_length,
                Some(reference.to_string()),
            ),
        }
    }

    fn coupon_reference(code: &str, account_id: &AccountId) -> String {
        format!("coupon:{code}:{account_id}")
    }

    fn already_redeemed(code: &str) -> BillingError {
        BillingError::InvalidCoupon {
            code: code.to_string(),
            reason: "already redeemed by this account".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::test_support::FlakyStore;
    use wordmeter_core::{
        Coupon, CouponPurpose, DiscountType, IntentStatus, PlanTier, SettlementOutcome,
        SettlementPayload, SettlementStatus, PRO_PRICE_CENTS, PRO_QUOTA_WORDS,
    };
    use wordmeter_store::MemoryStore;

    fn engine_over(store: Arc<dyn Store>) -> (BillingEngine, AccountId) {
        let engine = BillingEngine::new(
            store,
            EngineConfig {
                webhook_secret: "whsec".into(),
                ..EngineConfig::default()
            },
        );
        let account_id = AccountId::generate();
        engine.ledger().open_account(account_id).unwrap();
        (engine, account_id)
    }

    fn engine() -> (BillingEngine, AccountId) {
        engine_over(Arc::new(MemoryStore::new()))
    }

    fn add_coupon(engine: &BillingEngine, code: &str, percent: i64, max_uses: u32) {
        engine
            .coupons()
            .create(
                Coupon::new(
                    code,
                    DiscountType::Percentage,
                    percent,
                    max_uses,
                    CouponPurpose::Both,
                    None,
                )
                .unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn full_discount_grants_plan_without_payment() {
        let (engine, account_id) = engine();
        add_coupon(&engine, "WELCOME100", 100, 10);

        let outcome = engine
            .checkout(
                &account_id,
                Grant::Plan {
                    tier: PlanTier::Pro,
                },
                Some("welcome100"),
            )
            .unwrap();
        let CheckoutOutcome::Granted {
            coupon_code,
            discount_cents,
            ..
        } = outcome
        else {
            panic!("full discount should grant directly");
        };
        assert_eq!(coupon_code, "WELCOME100");
        assert_eq!(discount_cents, PRO_PRICE_CENTS);

        let account = engine.ledger().get_account(&account_id).unwrap();
        assert_eq!(account.plan, PlanTier::Pro);
        assert_eq!(account.plan_quota_limit, PRO_QUOTA_WORDS);
        assert_eq!(engine.coupons().get("WELCOME100").unwrap().used_count, 1);
        assert!(engine.reconciler().list_pending_intents(10).unwrap().is_empty());

        let invoices = engine.invoices().list(&account_id, 10).unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].amount_cents, 0);
        assert_eq!(invoices[0].discount_cents, PRO_PRICE_CENTS);
    }

    #[test]
    fn same_account_cannot_reuse_free_coupon() {
        let (engine, account_id) = engine();
        add_coupon(&engine, "FREEWORDS", 100, 10);
        let grant = Grant::Credit { words: 1_000 };

        engine.checkout(&account_id, grant, Some("FREEWORDS")).unwrap();
        let err = engine
            .checkout(&account_id, grant, Some("FREEWORDS"))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_COUPON");
        assert_eq!(engine.coupons().get("FREEWORDS").unwrap().used_count, 1);
        assert_eq!(
            engine.ledger().get_account(&account_id).unwrap().purchased_credit,
            1_000
        );
    }

    #[test]
    fn exhausted_coupon_grants_nothing() {
        let (engine, account_id) = engine();
        add_coupon(&engine, "ONCE", 100, 1);
        let other = AccountId::generate();
        engine.ledger().open_account(other).unwrap();

        engine
            .checkout(&other, Grant::Credit { words: 500 }, Some("ONCE"))
            .unwrap();
        let err = engine
            .checkout(&account_id, Grant::Credit { words: 500 }, Some("ONCE"))
            .unwrap_err();
        assert_eq!(err.code(), "COUPON_EXHAUSTED");
        assert_eq!(
            engine.ledger().get_account(&account_id).unwrap().purchased_credit,
            0
        );
    }

    #[test]
    fn partial_discount_opens_discounted_intent() {
        let (engine, account_id) = engine();
        add_coupon(&engine, "HALF", 50, 10);

        let outcome = engine
            .checkout(
                &account_id,
                Grant::Plan {
                    tier: PlanTier::Pro,
                },
                Some("HALF"),
            )
            .unwrap();
        let CheckoutOutcome::PaymentRequired { intent } = outcome else {
            panic!("partial discount needs payment");
        };
        assert_eq!(intent.amount_cents, PRO_PRICE_CENTS - PRO_PRICE_CENTS / 2);
        assert_eq!(intent.coupon_code.as_deref(), Some("HALF"));
        assert_eq!(engine.ledger().get_account(&account_id).unwrap().plan, PlanTier::Free);
    }

    #[test]
    fn checkout_without_coupon_opens_full_price_intent() {
        let (engine, account_id) = engine();
        let outcome = engine
            .checkout(&account_id, Grant::Credit { words: 2_000 }, None)
            .unwrap();
        let CheckoutOutcome::PaymentRequired { intent } = outcome else {
            panic!("no coupon means payment");
        };
        assert_eq!(intent.amount_cents, 200);
    }

    #[test]
    fn failed_grant_releases_coupon() {
        let store = Arc::new(FlakyStore::new());
        let (engine, account_id) = engine_over(store.clone());
        add_coupon(&engine, "WELCOME100", 100, 1);

        store.set_fail_commits(true);
        let err = engine
            .checkout(
                &account_id,
                Grant::Plan {
                    tier: PlanTier::Pro,
                },
                Some("WELCOME100"),
            )
            .unwrap_err();
        assert_eq!(err.code(), "STORAGE");
        assert_eq!(engine.coupons().get("WELCOME100").unwrap().used_count, 0);
        assert_eq!(engine.ledger().get_account(&account_id).unwrap().plan, PlanTier::Free);
    }

    #[test]
    fn blocked_downgrade_does_not_burn_coupon() {
        let (engine, account_id) = engine();
        add_coupon(&engine, "WELCOME100", 100, 5);
        engine
            .subscriptions()
            .activate(&account_id, PlanTier::Premium, Duration::days(30))
            .unwrap();

        let err = engine
            .checkout(
                &account_id,
                Grant::Plan {
                    tier: PlanTier::Pro,
                },
                Some("WELCOME100"),
            )
            .unwrap_err();
        assert_eq!(err.code(), "DOWNGRADE_BLOCKED");
        assert_eq!(engine.coupons().get("WELCOME100").unwrap().used_count, 0);
    }

    #[test]
    fn free_tier_is_not_for_sale() {
        let (engine, _) = engine();
        assert!(engine
            .price(Grant::Plan {
                tier: PlanTier::Free
            })
            .is_err());
    }

    #[test]
    fn max_credit_purchase_is_refused_without_overflow() {
        let (engine, account_id) = engine();
        let grant = Grant::Credit { words: i64::MAX };
        assert_eq!(engine.price(grant).unwrap(), i64::MAX / 10 + 1);

        let err = engine.checkout(&account_id, grant, None).unwrap_err();
        assert_eq!(err.code(), "CREDIT_CAP_EXCEEDED");
        assert!(engine.reconciler().list_pending_intents(10).unwrap().is_empty());
    }

    fn settle(engine: &BillingEngine, intent: &PaymentIntent) -> SettlementOutcome {
        let body = serde_json::to_vec(&SettlementPayload {
            intent_id: intent.id,
            reference: intent.external_reference.clone(),
            gateway_payment_id: "pay_renew".into(),
            amount_cents: intent.amount_cents,
            currency: intent.currency.clone(),
            status: SettlementStatus::Paid,
            failure_reason: None,
        })
        .unwrap();
        let signature = crypto::hmac_sha256_hex("whsec", &body).unwrap();
        engine
            .reconciler()
            .verify_and_settle(&intent.id, &signature, &body)
            .unwrap()
    }

    #[test]
    fn lapsed_paid_plan_waits_for_renewal_payment() {
        let (engine, account_id) = engine();
        engine
            .subscriptions()
            .activate(&account_id, PlanTier::Pro, Duration::days(30))
            .unwrap();

        let report = engine.process_due(Utc::now() + Duration::days(31)).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.renewed, 0);
        assert_eq!(report.renewal_intents.len(), 1);

        let account = engine.ledger().get_account(&account_id).unwrap();
        assert_eq!(account.plan, PlanTier::Free);
        assert!(engine.invoices().list(&account_id, 10).unwrap().is_empty());

        let intent = engine
            .reconciler()
            .get_intent(&report.renewal_intents[0])
            .unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(intent.grant, Grant::Plan { tier: PlanTier::Pro });
        assert_eq!(intent.amount_cents, PRO_PRICE_CENTS);

        assert!(matches!(
            settle(&engine, &intent),
            SettlementOutcome::Settled { .. }
        ));
        let account = engine.ledger().get_account(&account_id).unwrap();
        assert_eq!(account.plan, PlanTier::Pro);
        assert_eq!(account.plan_quota_limit, PRO_QUOTA_WORDS);

        let invoices = engine.invoices().list(&account_id, 10).unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].amount_cents, PRO_PRICE_CENTS);
    }

    #[test]
    fn lapsed_plan_without_auto_renew_gets_no_intent() {
        let (engine, account_id) = engine();
        engine
            .subscriptions()
            .set_auto_renew(&account_id, false)
            .unwrap();
        engine
            .subscriptions()
            .activate(&account_id, PlanTier::Premium, Duration::days(30))
            .unwrap();

        let report = engine.process_due(Utc::now() + Duration::days(31)).unwrap();
        assert_eq!(report.expired, 1);
        assert!(report.renewal_intents.is_empty());
        assert!(engine.reconciler().list_pending_intents(10).unwrap().is_empty());
    }
}
