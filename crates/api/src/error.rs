//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use coachdesk_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the synchronous tenant routes.
///
/// The webhook routes deliberately do not use this type: providers get a
/// 200 ACK for everything except failed authentication, which the
/// handlers encode directly.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "Internal server error");
        }

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::AuthenticationFailed => ApiError::Unauthorized,
            BillingError::MalformedPayload(detail) => ApiError::BadRequest(detail),
            BillingError::UnknownPlan(plan) => {
                ApiError::BadRequest(format!("unknown plan: {plan}"))
            }
            BillingError::InvalidUpgrade(reason) => ApiError::BadRequest(reason),
            BillingError::ActivationTokenInvalid => {
                ApiError::BadRequest("activation token invalid or already used".to_string())
            }
            BillingError::NotFound(what) => ApiError::NotFound(what),
            BillingError::ConcurrentModification(what) => {
                ApiError::Conflict(format!("concurrent modification, retry: {what}"))
            }
            BillingError::Database(detail)
            | BillingError::EmailDispatch(detail)
            | BillingError::Internal(detail) => ApiError::Internal(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_errors_map_to_expected_statuses() {
        let cases = [
            (BillingError::AuthenticationFailed, StatusCode::UNAUTHORIZED),
            (
                BillingError::InvalidUpgrade("pro -> starter".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (BillingError::ActivationTokenInvalid, StatusCode::BAD_REQUEST),
            (
                BillingError::NotFound("x".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                BillingError::ConcurrentModification("x".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                BillingError::Database("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
