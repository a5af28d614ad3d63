//! Checkout, coupon and settlement webhook integration tests.

mod common;

use axum::http::StatusCode;
use common::{paid_payload, TestHarness, SIGNATURE_HEADER};
use serde_json::{json, Value};
use wordmeter_core::PlanTier;

async fn pending_intent(harness: &TestHarness, grant: Value) -> Value {
    let response = harness.checkout(grant, None).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "payment_required");
    body["intent"].clone()
}

#[tokio::test]
async fn settlement_credits_once() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let intent = pending_intent(&harness, json!({ "kind": "credit", "words": 2000 })).await;
    assert_eq!(intent["amount_cents"], 200);
    assert_eq!(intent["status"], "pending");

    let first = harness.deliver(&paid_payload(&intent)).await;
    first.assert_status_ok();
    let first: Value = first.json();
    assert_eq!(first["outcome"]["outcome"], "settled");

    let second = harness.deliver(&paid_payload(&intent)).await;
    second.assert_status_ok();
    let second: Value = second.json();
    assert_eq!(second["outcome"]["outcome"], "already_settled");
    assert_eq!(
        second["outcome"]["transaction_id"],
        first["outcome"]["transaction_id"]
    );

    let account = harness
        .state
        .engine
        .ledger()
        .get_account(&harness.test_account_id)
        .unwrap();
    assert_eq!(account.purchased_credit, 2000);

    let invoices = harness
        .state
        .engine
        .invoices()
        .list(&harness.test_account_id, 10)
        .unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].amount_cents, 200);
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let intent = pending_intent(&harness, json!({ "kind": "credit", "words": 1000 })).await;

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header(SIGNATURE_HEADER, "00".repeat(32))
        .json(&paid_payload(&intent))
        .await;

    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "SIGNATURE_INVALID");
    assert_eq!(
        harness
            .state
            .engine
            .ledger()
            .available(&harness.test_account_id)
            .unwrap(),
        1000
    );
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let intent = pending_intent(&harness, json!({ "kind": "credit", "words": 1000 })).await;

    let response = harness
        .server
        .post("/webhooks/payments")
        .json(&paid_payload(&intent))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let intent = pending_intent(&harness, json!({ "kind": "plan", "tier": "pro" })).await;
    let mut payload = paid_payload(&intent);
    payload["amount_cents"] = json!(1);

    let response = harness.deliver(&payload).await;

    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "SETTLEMENT_MISMATCH");
}

#[tokio::test]
async fn paid_subscription_activates_plan() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let intent = pending_intent(&harness, json!({ "kind": "plan", "tier": "premium" })).await;
    assert_eq!(intent["amount_cents"], 799);

    harness.deliver(&paid_payload(&intent)).await.assert_status_ok();

    let account = harness
        .state
        .engine
        .ledger()
        .get_account(&harness.test_account_id)
        .unwrap();
    assert_eq!(account.plan, PlanTier::Premium);
    assert_eq!(account.plan_quota_limit, 50_000);
}

#[tokio::test]
async fn failed_payment_marks_intent_failed() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let intent = pending_intent(&harness, json!({ "kind": "credit", "words": 1000 })).await;
    let mut payload = paid_payload(&intent);
    payload["status"] = json!("failed");
    payload["failure_reason"] = json!("card_declined");

    let response = harness.deliver(&payload).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["outcome"]["outcome"], "failed");

    let fetched = harness
        .server
        .get(&format!("/v1/payments/intents/{}", intent["id"].as_str().unwrap()))
        .add_header("authorization", harness.user_auth_header())
        .await;
    fetched.assert_status_ok();
    let fetched: Value = fetched.json();
    assert_eq!(fetched["status"], "failed");

    let late = harness.deliver(&paid_payload(&intent)).await;
    late.assert_status(StatusCode::CONFLICT);
    let late: Value = late.json();
    assert_eq!(late["error"]["code"], "INTENT_FAILED");
}

#[tokio::test]
async fn full_coupon_grants_without_payment() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.create_coupon("WELCOME100", 100, 10).await;

    let response = harness
        .checkout(json!({ "kind": "plan", "tier": "pro" }), Some("welcome100"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "granted");
    assert_eq!(body["coupon_code"], "WELCOME100");
    assert_eq!(body["discount_cents"], 299);

    let me: Value = harness
        .server
        .get("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(me["plan"], "pro");
    assert_eq!(me["plan_quota_limit"], 10000);

    let again = harness
        .checkout(json!({ "kind": "plan", "tier": "pro" }), Some("WELCOME100"))
        .await;
    again.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn coupon_preview_consumes_nothing() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.create_coupon("HALF", 50, 1).await;

    let response = harness
        .server
        .post("/v1/coupons/validate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": "half", "grant": { "kind": "plan", "tier": "pro" } }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["amount_cents"], 299);
    assert_eq!(body["discount_cents"], 149);
    assert_eq!(body["final_amount_cents"], 150);
    assert_eq!(
        harness.state.engine.coupons().get("HALF").unwrap().used_count,
        0
    );
}

#[tokio::test]
async fn partial_coupon_discounts_the_intent() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.create_coupon("HALF", 50, 5).await;

    let response = harness
        .checkout(json!({ "kind": "plan", "tier": "pro" }), Some("HALF"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "payment_required");
    assert_eq!(body["intent"]["amount_cents"], 150);
    assert_eq!(body["intent"]["coupon_code"], "HALF");

    harness
        .deliver(&paid_payload(&body["intent"]))
        .await
        .assert_status_ok();
    let account = harness
        .state
        .engine
        .ledger()
        .get_account(&harness.test_account_id)
        .unwrap();
    assert_eq!(account.plan, PlanTier::Pro);
}

#[tokio::test]
async fn unknown_coupon_is_bad_request() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = harness
        .checkout(json!({ "kind": "credit", "words": 1000 }), Some("NOPE"))
        .await;

    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "INVALID_COUPON");
}

#[tokio::test]
async fn oversized_credit_purchase_is_refused() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = harness
        .checkout(json!({ "kind": "credit", "words": i64::MAX }), None)
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "CREDIT_CAP_EXCEEDED");
}

#[tokio::test]
async fn other_users_intents_are_hidden() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let intent = pending_intent(&harness, json!({ "kind": "credit", "words": 1000 })).await;
    let other = wordmeter_core::AccountId::generate();

    let response = harness
        .server
        .get(&format!("/v1/payments/intents/{}", intent["id"].as_str().unwrap()))
        .add_header("authorization", TestHarness::auth_header_for(&other))
        .await;

    response.assert_status_not_found();
}
