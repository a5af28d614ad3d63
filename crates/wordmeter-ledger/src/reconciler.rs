//! Payment intents and settlement.
//!
//! An intent is persisted as `pending` before the gateway is contacted. The
//! gateway later posts a signed settlement; verifying it moves the intent to
//! `completed` exactly once and credits the ledger under the intent's
//! external reference, which the store keeps unique.
//!
//! When the settlement is verified but the ledger write fails, the money has
//! moved and the grant has not. That state is recorded as a
//! [`ReconciliationGap`] and closed by [`PaymentReconciler::retry_gap`] or by
//! a replayed settlement.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use wordmeter_core::{
    AccountId, BillingError, CouponQuote, Grant, IntentId, IntentStatus, Invoice, PaymentIntent,
    PaymentPurpose, ReconciliationGap, Result, SettlementOutcome, SettlementPayload,
    SettlementStatus,
};
use wordmeter_store::Store;

use crate::coupons::CouponRedeemer;
use crate::crypto;
use crate::invoice::{emit_best_effort, InvoiceEmitter};
use crate::ledger::{AccountLedger, Commit};
use crate::subscription::SubscriptionLifecycleManager;

/// Creates intents and settles them against the ledger.
pub struct PaymentReconciler {
    store: Arc<dyn Store>,
    ledger: Arc<AccountLedger>,
    subscriptions: Arc<SubscriptionLifecycleManager>,
    coupons: Arc<CouponRedeemer>,
    invoices: Arc<dyn InvoiceEmitter>,
    webhook_secret: String,
}

fn unknown_intent(intent_id: &IntentId) -> BillingError {
    BillingError::UnknownIntent {
        intent_id: intent_id.to_string(),
    }
}

impl PaymentReconciler {
    /// Create a reconciler that verifies settlements with `webhook_secret`.
    #[must_use]
    pub fn new(
        ledger: Arc<AccountLedger>,
        subscriptions: Arc<SubscriptionLifecycleManager>,
        coupons: Arc<CouponRedeemer>,
        invoices: Arc<dyn InvoiceEmitter>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            store: Arc::clone(ledger.store()),
            ledger,
            subscriptions,
            coupons,
            invoices,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Check that `grant` can be applied to the account today, so a user is
    /// never charged for something the ledger would refuse.
    ///
    /// # Errors
    ///
    /// - `BillingError::AccountNotFound` for an unknown account.
    /// - `BillingError::InvalidAmount` for a non-positive credit size.
    /// - Plan transition errors for subscriptions, `CreditCapExceeded` for credit.
    pub fn check_grant(&self, account_id: &AccountId, grant: Grant) -> Result<()> {
        let account = self.ledger.get_account(account_id)?;
        match grant {
            Grant::Plan { tier } => {
                SubscriptionLifecycleManager::check_transition(&account, tier, Utc::now())
            }
            Grant::Credit { words } => {
                if words <= 0 {
                    return Err(BillingError::InvalidAmount(format!(
                        "credit purchase of {words} words"
                    )));
                }
                AccountLedger::check_credit_cap(&account, words)
            }
        }
    }

    /// Persist a pending intent for a full-price purchase.
    ///
    /// # Errors
    ///
    /// - `BillingError::FreeGrantRequiresCoupon` for a zero amount.
    /// - `BillingError::InvalidAmount` for a negative amount or a bad currency.
    /// - Any [`check_grant`](Self::check_grant) error.
    pub fn create_intent(
        &self,
        account_id: &AccountId,
        grant: Grant,
        amount_cents: i64,
        currency: &str,
    ) -> Result<PaymentIntent> {
        let intent = PaymentIntent::new(*account_id, grant, amount_cents, currency);
        self.insert_intent(intent)
    }

    /// Persist a pending intent for a purchase discounted by an already
    /// redeemed coupon. Failing the intent later releases the coupon use.
    ///
    /// # Errors
    ///
    /// Same as [`create_intent`](Self::create_intent).
    pub fn create_discounted_intent(
        &self,
        account_id: &AccountId,
        grant: Grant,
        quote: &CouponQuote,
        currency: &str,
    ) -> Result<PaymentIntent> {
        let mut intent = PaymentIntent::new(*account_id, grant, quote.final_amount_cents, currency);
        intent.coupon_code = Some(quote.code.clone());
        intent.discount_cents = quote.discount_cents;
        self.insert_intent(intent)
    }

    fn insert_intent(&self, intent: PaymentIntent) -> Result<PaymentIntent> {
        if intent.amount_cents == 0 {
            return Err(BillingError::FreeGrantRequiresCoupon);
        }
        if intent.amount_cents < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "negative payment amount: {}",
                intent.amount_cents
            )));
        }
        if intent.currency.len() != 3 || !intent.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BillingError::InvalidAmount(format!(
                "invalid currency code: {}",
                intent.currency
            )));
        }
        self.check_grant(&intent.account_id, intent.grant)?;

        self.store.insert_intent(&intent)?;
        info!(
            intent_id = %intent.id,
            account_id = %intent.account_id,
            amount_cents = intent.amount_cents,
            currency = %intent.currency,
            purpose = ?intent.purpose(),
            "Created payment intent"
        );
        Ok(intent)
    }

    /// Look an intent up.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::UnknownIntent` if it doesn't exist.
    pub fn get_intent(&self, intent_id: &IntentId) -> Result<PaymentIntent> {
        self.store
            .get_intent(intent_id)?
            .ok_or_else(|| unknown_intent(intent_id))
    }

    /// Verify a signed settlement and apply it at most once.
    ///
    /// The signature is an HMAC-SHA256 hex digest of `raw_payload`.
    ///
    /// # Errors
    ///
    /// - `BillingError::UnknownIntent` for an unknown intent.
    /// - `BillingError::SignatureInvalid` when the signature doesn't match.
    /// - `BillingError::SettlementMismatch` when the payload disagrees with the intent.
    /// - `BillingError::IntentFailed` when the intent already failed.
    /// - `BillingError::ReconciliationGap` when the ledger write failed; the gap is stored.
    pub fn verify_and_settle(
        &self,
        intent_id: &IntentId,
        signature: &str,
        raw_payload: &[u8],
    ) -> Result<SettlementOutcome> {
        let intent = self.get_intent(intent_id)?;

        if !crypto::verify_signature(&self.webhook_secret, raw_payload, signature) {
            warn!(intent_id = %intent_id, "Rejected settlement with invalid signature");
            return Err(BillingError::SignatureInvalid);
        }

        let payload: SettlementPayload = serde_json::from_slice(raw_payload)
            .map_err(|e| BillingError::SettlementMismatch(format!("malformed payload: {e}")))?;
        if payload.intent_id != intent.id || payload.reference != intent.external_reference {
            return Err(BillingError::SettlementMismatch(format!(
                "payload names {} / {}, expected {} / {}",
                payload.intent_id, payload.reference, intent.id, intent.external_reference
            )));
        }

        if payload.status == SettlementStatus::Failed {
            let reason = payload
                .failure_reason
                .unwrap_or_else(|| "payment failed at gateway".into());
            let failed = self.mark_failed(intent_id, &reason)?;
            return Ok(SettlementOutcome::Failed {
                reason: failed.failure_reason.unwrap_or(reason),
            });
        }

        if payload.amount_cents != intent.amount_cents
            || !payload.currency.eq_ignore_ascii_case(&intent.currency)
        {
            return Err(BillingError::SettlementMismatch(format!(
                "paid {} {}, intent expects {} {}",
                payload.amount_cents, payload.currency, intent.amount_cents, intent.currency
            )));
        }

        match intent.status {
            IntentStatus::Failed => Err(BillingError::IntentFailed {
                intent_id: intent_id.to_string(),
            }),
            IntentStatus::Completed => self.settle_completed(&intent),
            IntentStatus::Pending => {
                let mut completed = intent.clone();
                completed.status = IntentStatus::Completed;
                completed.gateway_payment_id = Some(payload.gateway_payment_id);
                completed.settled_at = Some(Utc::now());

                if !self.store.transition_intent(&completed, IntentStatus::Pending)? {
                    // Another delivery won the transition; report what it left.
                    let current = self.get_intent(intent_id)?;
                    return match current.status {
                        IntentStatus::Failed => Err(BillingError::IntentFailed {
                            intent_id: intent_id.to_string(),
                        }),
                        _ => Ok(SettlementOutcome::AlreadySettled {
                            transaction_id: self
                                .store
                                .find_transaction_by_reference(&current.external_reference)?
                                .map(|tx| tx.id),
                        }),
                    };
                }

                info!(
                    intent_id = %intent_id,
                    account_id = %completed.account_id,
                    amount_cents = completed.amount_cents,
                    "Payment settled"
                );
                self.credit_settled(&completed)
            }
        }
    }

    /// A completed intent settled again: replay, or recover a missing credit.
    fn settle_completed(&self, intent: &PaymentIntent) -> Result<SettlementOutcome> {
        if let Some(tx) = self
            .store
            .find_transaction_by_reference(&intent.external_reference)?
        {
            info!(intent_id = %intent.id, "Settlement replayed, already credited");
            return Ok(SettlementOutcome::AlreadySettled {
                transaction_id: Some(tx.id),
            });
        }
        warn!(intent_id = %intent.id, "Completed intent has no ledger entry, re-crediting");
        self.credit_settled(intent)
    }

    /// Apply the grant for a completed intent, recording a gap on failure.
    fn credit_settled(&self, intent: &PaymentIntent) -> Result<SettlementOutcome> {
        match self.apply_grant(intent) {
            Ok(commit) => {
                self.resolve_gap(intent)?;
                let transaction = commit.transaction.clone().ok_or_else(|| {
                    BillingError::Storage("settlement recorded no transaction".into())
                })?;
                if commit.replayed {
                    return Ok(SettlementOutcome::AlreadySettled {
                        transaction_id: Some(transaction.id),
                    });
                }
                emit_best_effort(
                    self.invoices.as_ref(),
                    &Invoice::for_transaction(&transaction, intent.amount_cents, &intent.currency)
                        .with_intent(intent.id)
                        .with_coupon(intent.coupon_code.clone(), intent.discount_cents),
                );
                Ok(SettlementOutcome::Settled {
                    transaction_id: transaction.id,
                })
            }
            Err(e) => Err(self.record_gap(intent, &e)),
        }
    }

    fn apply_grant(&self, intent: &PaymentIntent) -> Result<Commit> {
        match intent.grant {
            Grant::Credit { words } => self.ledger.credit(
                &intent.account_id,
                PaymentPurpose::CreditPurchase,
                0,
                words,
                &intent.external_reference,
            ),
            Grant::Plan { tier } => self.subscriptions.activate_with_reference(
                &intent.account_id,
                tier,
                self.subscriptions.cycle_length(),
                Some(intent.external_reference.clone()),
            ),
        }
    }

    fn record_gap(&self, intent: &PaymentIntent, cause: &BillingError) -> BillingError {
        let gap = match self.store.get_gap(&intent.id) {
            Ok(Some(mut gap)) => {
                gap.attempts += 1;
                gap.last_error = cause.to_string();
                gap.resolved_at = None;
                gap
            }
            Ok(None) => ReconciliationGap::open(intent, cause.to_string()),
            Err(e) => {
                // The stored gap, if any, keeps its attempt count.
                error!(
                    intent_id = %intent.id,
                    account_id = %intent.account_id,
                    error = %cause,
                    read_error = %e,
                    "Verified payment could not be credited; gap record unreadable"
                );
                return BillingError::ReconciliationGap {
                    intent_id: intent.id.to_string(),
                    reason: cause.to_string(),
                };
            }
        };

        error!(
            intent_id = %intent.id,
            account_id = %intent.account_id,
            reference = %intent.external_reference,
            attempts = gap.attempts,
            error = %cause,
            "Verified payment could not be credited"
        );
        if let Err(e) = self.store.put_gap(&gap) {
            error!(intent_id = %intent.id, error = %e, "Failed to record reconciliation gap");
        }

        BillingError::ReconciliationGap {
            intent_id: intent.id.to_string(),
            reason: cause.to_string(),
        }
    }

    fn resolve_gap(&self, intent: &PaymentIntent) -> Result<()> {
        if let Some(mut gap) = self.store.get_gap(&intent.id)?.filter(ReconciliationGap::is_open) {
            gap.resolved_at = Some(Utc::now());
            self.store.put_gap(&gap)?;
            info!(intent_id = %intent.id, attempts = gap.attempts, "Reconciliation gap resolved");
        }
        Ok(())
    }

    /// Re-apply the credit for a recorded gap.
    ///
    /// # Errors
    ///
    /// - `BillingError::UnknownIntent` if no gap is recorded for the intent.
    /// - `BillingError::ReconciliationGap` if the credit failed again.
    pub fn retry_gap(&self, intent_id: &IntentId) -> Result<SettlementOutcome> {
        let gap = self
            .store
            .get_gap(intent_id)?
            .ok_or_else(|| unknown_intent(intent_id))?;
        let intent = self.get_intent(intent_id)?;

        if !gap.is_open() {
            return Ok(SettlementOutcome::AlreadySettled {
                transaction_id: self
                    .store
                    .find_transaction_by_reference(&intent.external_reference)?
                    .map(|tx| tx.id),
            });
        }
        info!(intent_id = %intent_id, attempts = gap.attempts, "Retrying reconciliation gap");
        self.credit_settled(&intent)
    }

    /// Open reconciliation gaps, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn list_gaps(&self) -> Result<Vec<ReconciliationGap>> {
        Ok(self.store.list_open_gaps()?)
    }

    /// Pending intents, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn list_pending_intents(&self, limit: usize) -> Result<Vec<PaymentIntent>> {
        Ok(self
            .store
            .list_intents_by_status(IntentStatus::Pending, limit)?)
    }

    /// Pending intents older than `age`, for manual follow-up with the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn list_stale_intents(&self, age: Duration, limit: usize) -> Result<Vec<PaymentIntent>> {
        let cutoff = Utc::now() - age;
        Ok(self
            .list_pending_intents(usize::MAX)?
            .into_iter()
            .filter(|intent| intent.created_at <= cutoff)
            .take(limit)
            .collect())
    }

    /// Mark an intent failed. Terminal; the ledger is not touched. A coupon
    /// use reserved for the intent is released.
    ///
    /// Failing an already failed intent returns it unchanged.
    ///
    /// # Errors
    ///
    /// - `BillingError::UnknownIntent` for an unknown intent.
    /// - `BillingError::SettlementMismatch` if the intent already completed.
    pub fn mark_failed(&self, intent_id: &IntentId, reason: &str) -> Result<PaymentIntent> {
        let intent = self.get_intent(intent_id)?;
        match intent.status {
            IntentStatus::Failed => return Ok(intent),
            IntentStatus::Completed => {
                return Err(BillingError::SettlementMismatch(format!(
                    "intent {intent_id} already completed"
                )))
            }
            IntentStatus::Pending => {}
        }

        let mut failed = intent;
        failed.status = IntentStatus::Failed;
        failed.failure_reason = Some(reason.to_string());
        failed.settled_at = Some(Utc::now());

        if !self.store.transition_intent(&failed, IntentStatus::Pending)? {
            // Lost a race with another terminal transition.
            let current = self.get_intent(intent_id)?;
            return match current.status {
                IntentStatus::Completed => Err(BillingError::SettlementMismatch(format!(
                    "intent {intent_id} already completed"
                ))),
                _ => Ok(current),
            };
        }

        warn!(intent_id = %intent_id, account_id = %failed.account_id, reason, "Payment failed");
        if let Some(code) = &failed.coupon_code {
            if let Err(e) = self.coupons.release(code) {
                warn!(intent_id = %intent_id, code = %code, error = %e, "Failed to release coupon");
            }
        }
        Ok(failed)
    }
}
