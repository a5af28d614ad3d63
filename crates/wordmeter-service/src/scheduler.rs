//! Background renewal sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;
use wordmeter_ledger::{BillingEngine, RenewalReport};

/// Run [`tick`] every `interval` until the task is aborted.
pub fn spawn(engine: Arc<BillingEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let engine = Arc::clone(&engine);
            if let Err(e) = tokio::task::spawn_blocking(move || tick(&engine)).await {
                tracing::warn!(error = %e, "Renewal sweep task panicked");
            }
        }
    })
}

/// One sweep: renew or expire every account whose cycle has ended.
pub fn tick(engine: &BillingEngine) -> Option<RenewalReport> {
    match engine.process_due(Utc::now()) {
        Ok(report) => {
            if report.renewed + report.expired + report.failed > 0 {
                tracing::info!(
                    renewed = report.renewed,
                    expired = report.expired,
                    failed = report.failed,
                    renewal_intents = report.renewal_intents.len(),
                    "Renewal sweep finished"
                );
            } else {
                tracing::debug!("Renewal sweep found nothing due");
            }
            Some(report)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Renewal sweep failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordmeter_core::{AccountId, PlanTier};
    use wordmeter_ledger::EngineConfig;
    use wordmeter_store::MemoryStore;

    #[test]
    fn tick_expires_lapsed_plans() {
        let engine = BillingEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
        let account_id = AccountId::generate();
        engine.ledger().open_account(account_id).unwrap();
        engine
            .subscriptions()
            .set_auto_renew(&account_id, false)
            .unwrap();
        engine
            .subscriptions()
            .activate(&account_id, PlanTier::Pro, chrono::Duration::seconds(-1))
            .unwrap();

        let report = tick(&engine).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(
            engine.ledger().get_account(&account_id).unwrap().plan,
            PlanTier::Free
        );
    }
}
