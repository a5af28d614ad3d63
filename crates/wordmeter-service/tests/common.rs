//! Common test utilities for wordmeter integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use wordmeter_core::AccountId;
use wordmeter_ledger::crypto::hmac_sha256_hex;
use wordmeter_service::auth::JwtClaims;
use wordmeter_service::{create_router, AppState, ServiceConfig};
use wordmeter_store::MemoryStore;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const SIGNATURE_HEADER: &str = "x-wordmeter-signature";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Shared state, for reaching the engine directly.
    pub state: AppState,
    /// A test account ID for authenticated requests.
    pub test_account_id: AccountId,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The admin API key.
    pub admin_api_key: String,
}

impl TestHarness {
    /// Create a new test harness over an empty in-memory store.
    pub fn new() -> Self {
        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: Some(JWT_SECRET.into()),
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            webhook_secret: Some(WEBHOOK_SECRET.into()),
            renewal_interval_seconds: 0,
            ..ServiceConfig::default()
        };

        let state = AppState::new(Arc::new(MemoryStore::new()), config);
        let router: Router = create_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            test_account_id: AccountId::generate(),
            service_api_key,
            admin_api_key,
        }
    }

    /// Get the authorization header for the test account.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(&self.test_account_id)
    }

    /// Bearer header with a signed token for any account.
    pub fn auth_header_for(account_id: &AccountId) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: account_id.to_string(),
            aud: "wordmeter".into(),
            iss: "wordmeter-auth".into(),
            exp: now + 3600,
            iat: now,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Register the test account.
    pub async fn create_account(&self) -> Value {
        let response = self
            .server
            .post("/v1/accounts")
            .add_header("authorization", self.user_auth_header())
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Create a coupon through the admin API.
    pub async fn create_coupon(&self, code: &str, percent: i64, max_uses: u32) {
        self.server
            .post("/v1/admin/coupons")
            .add_header("x-admin-key", &self.admin_api_key)
            .json(&json!({
                "code": code,
                "discount_type": "percentage",
                "discount_value": percent,
                "max_uses": max_uses
            }))
            .await
            .assert_status_ok();
    }

    /// Reserve words for the test account.
    pub async fn reserve(&self, words: i64) -> axum_test::TestResponse {
        self.server
            .post("/v1/usage/reserve")
            .add_header("x-api-key", &self.service_api_key)
            .add_header("x-service-name", "summarizer")
            .json(&json!({
                "account_id": self.test_account_id.to_string(),
                "words": words
            }))
            .await
    }

    /// Start a checkout for the test account.
    pub async fn checkout(&self, grant: Value, coupon_code: Option<&str>) -> axum_test::TestResponse {
        self.server
            .post("/v1/payments/intents")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({ "grant": grant, "coupon_code": coupon_code }))
            .await
    }

    /// Deliver a signed settlement webhook.
    pub async fn deliver(&self, payload: &Value) -> axum_test::TestResponse {
        let body = serde_json::to_string(payload).expect("payload serializes");
        let signature = hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes()).expect("secret is set");
        self.server
            .post("/webhooks/payments")
            .add_header(SIGNATURE_HEADER, signature)
            .text(&body)
            .await
    }
}

/// Settlement payload for a pending intent returned by checkout.
pub fn paid_payload(intent: &Value) -> Value {
    json!({
        "intent_id": intent["id"],
        "reference": intent["external_reference"],
        "gateway_payment_id": "pay_test_1",
        "amount_cents": intent["amount_cents"],
        "currency": intent["currency"],
        "status": "paid"
    })
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
