//! Health and catalog integration tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn health_check_returns_ok() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "wordmeter");
}

#[tokio::test]
async fn plans_are_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/plans").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let plans = body.as_array().unwrap();
    assert_eq!(plans.len(), 3);
    assert_eq!(plans[0]["tier"], "free");
    assert_eq!(plans[0]["quota_limit"], 1000);
    assert_eq!(plans[1]["price_cents"], 299);
    assert_eq!(plans[2]["quota_limit"], 50000);
}
