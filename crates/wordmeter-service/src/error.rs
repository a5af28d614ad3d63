//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use wordmeter_core::BillingError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Ledger, payment, coupon or subscription failure.
    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            Self::Billing(err) => billing_parts(err),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

fn billing_parts(
    err: &BillingError,
) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
    let code = err.code();
    match err {
        BillingError::InsufficientBalance {
            available,
            requested,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            code,
            err.to_string(),
            Some(serde_json::json!({
                "available": available,
                "requested": requested,
                "shortfall": err.shortfall(),
            })),
        ),
        BillingError::InvalidCoupon { reason, .. } => (
            StatusCode::BAD_REQUEST,
            code,
            err.to_string(),
            Some(serde_json::json!({ "reason": reason })),
        ),
        BillingError::DowngradeBlocked { expires_at, .. } => (
            StatusCode::CONFLICT,
            code,
            err.to_string(),
            Some(serde_json::json!({ "expires_at": expires_at })),
        ),
        BillingError::CreditCapExceeded { cap, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            err.to_string(),
            Some(serde_json::json!({ "cap": cap })),
        ),
        BillingError::CouponExpired { .. }
        | BillingError::PlanUnknown { .. }
        | BillingError::InvalidAmount(_)
        | BillingError::InvalidId(_)
        | BillingError::FreeGrantRequiresCoupon
        | BillingError::SettlementMismatch(_) => {
            (StatusCode::BAD_REQUEST, code, err.to_string(), None)
        }
        BillingError::SignatureInvalid => {
            (StatusCode::UNAUTHORIZED, code, err.to_string(), None)
        }
        BillingError::UnknownIntent { .. }
        | BillingError::AccountNotFound { .. }
        | BillingError::TransactionNotFound { .. } => {
            (StatusCode::NOT_FOUND, code, err.to_string(), None)
        }
        BillingError::CouponExhausted { .. }
        | BillingError::InvalidPlanTransition { .. }
        | BillingError::AccountAlreadyExists { .. }
        | BillingError::IntentFailed { .. } => (StatusCode::CONFLICT, code, err.to_string(), None),
        BillingError::Contention { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, code, err.to_string(), None)
        }
        BillingError::ReconciliationGap { .. } => {
            tracing::error!(error = %err, "Settlement left a reconciliation gap");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                err.to_string(),
                None,
            )
        }
        BillingError::Storage(_)
        | BillingError::Serialization(_)
        | BillingError::Configuration(_) => {
            tracing::error!(error = %err, "Internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "An internal error occurred".to_string(),
                None,
            )
        }
    }
}
