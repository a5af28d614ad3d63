//! Admin endpoint integration tests.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{paid_payload, TestHarness};
use serde_json::{json, Value};
use wordmeter_core::PlanTier;

#[tokio::test]
async fn admin_routes_require_admin_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/admin/reconciliation-gaps")
        .add_header("x-admin-key", "nope")
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn duplicate_coupon_code_rejected() {
    let harness = TestHarness::new();
    harness.create_coupon("SPRING", 20, 5).await;

    let response = harness
        .server
        .post("/v1/admin/coupons")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&json!({
            "code": "spring",
            "discount_type": "fixed",
            "discount_value": 100,
            "max_uses": 1
        }))
        .await;

    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "INVALID_COUPON");
}

#[tokio::test]
async fn deactivated_coupon_stops_validating() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.create_coupon("SPRING", 20, 5).await;

    let response = harness
        .server
        .post("/v1/admin/coupons/spring/deactivate")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["active"], false);

    harness
        .checkout(json!({ "kind": "plan", "tier": "pro" }), Some("SPRING"))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn exhausted_coupon_conflicts() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.create_coupon("ONCE", 100, 1).await;
    harness
        .checkout(json!({ "kind": "credit", "words": 500 }), Some("ONCE"))
        .await
        .assert_status_ok();

    let other = wordmeter_core::AccountId::generate();
    harness.state.engine.ledger().open_account(other).unwrap();
    let response = harness
        .server
        .post("/v1/payments/intents")
        .add_header("authorization", TestHarness::auth_header_for(&other))
        .json(&json!({ "grant": { "kind": "credit", "words": 500 }, "coupon_code": "ONCE" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "COUPON_EXHAUSTED");
}

#[tokio::test]
async fn renewal_sweep_expires_lapsed_plan() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let subscriptions = harness.state.engine.subscriptions();
    subscriptions
        .activate(&harness.test_account_id, PlanTier::Pro, Duration::days(30))
        .unwrap();
    subscriptions
        .set_auto_renew(&harness.test_account_id, false)
        .unwrap();

    let response = harness
        .server
        .post("/v1/admin/renew")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&json!({ "as_of": Utc::now() + Duration::days(31) }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["expired"], 1);
    assert_eq!(body["failed"], 0);
    let account = harness
        .state
        .engine
        .ledger()
        .get_account(&harness.test_account_id)
        .unwrap();
    assert_eq!(account.plan, PlanTier::Free);
    assert_eq!(account.plan_quota_limit, 1000);
}

#[tokio::test]
async fn auto_renew_plan_returns_only_after_payment() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness
        .state
        .engine
        .subscriptions()
        .activate(&harness.test_account_id, PlanTier::Pro, Duration::days(30))
        .unwrap();

    let body: Value = harness
        .server
        .post("/v1/admin/renew")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&json!({ "as_of": Utc::now() + Duration::days(31) }))
        .await
        .json();
    assert_eq!(body["expired"], 1);
    assert_eq!(body["renewed"], 0);
    assert_eq!(body["renewal_intents"].as_array().unwrap().len(), 1);

    let engine = &harness.state.engine;
    let account = engine.ledger().get_account(&harness.test_account_id).unwrap();
    assert_eq!(account.plan, PlanTier::Free);

    let pending: Value = harness
        .server
        .get("/v1/admin/intents/pending")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .json();
    let intent = &pending.as_array().unwrap()[0];
    assert_eq!(intent["id"], body["renewal_intents"][0]);

    harness.deliver(&paid_payload(intent)).await.assert_status_ok();

    let account = engine.ledger().get_account(&harness.test_account_id).unwrap();
    assert_eq!(account.plan, PlanTier::Pro);
    assert_eq!(
        engine.invoices().list(&harness.test_account_id, 10).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn renewal_sweep_with_nothing_due() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = harness
        .server
        .post("/v1/admin/renew")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["renewed"], 0);
    assert_eq!(body["expired"], 0);
}

#[tokio::test]
async fn failing_an_intent_releases_its_coupon() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.create_coupon("HALF", 50, 1).await;
    let checkout: Value = harness
        .checkout(json!({ "kind": "plan", "tier": "pro" }), Some("HALF"))
        .await
        .json();
    let intent_id = checkout["intent"]["id"].as_str().unwrap().to_string();
    assert_eq!(
        harness.state.engine.coupons().get("HALF").unwrap().used_count,
        1
    );

    let pending: Value = harness
        .server
        .get("/v1/admin/intents/pending")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .json();
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let response = harness
        .server
        .post(&format!("/v1/admin/intents/{intent_id}/fail"))
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&json!({ "reason": "abandoned" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["failure_reason"], "abandoned");
    assert_eq!(
        harness.state.engine.coupons().get("HALF").unwrap().used_count,
        0
    );
}

#[tokio::test]
async fn gaps_list_starts_empty_and_unknown_retry_is_not_found() {
    let harness = TestHarness::new();

    let gaps: Value = harness
        .server
        .get("/v1/admin/reconciliation-gaps")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .json();
    assert!(gaps.as_array().unwrap().is_empty());

    let response = harness
        .server
        .post(&format!(
            "/v1/admin/reconciliation-gaps/{}/retry",
            wordmeter_core::IntentId::generate()
        ))
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;
    response.assert_status_not_found();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "UNKNOWN_INTENT");
}
