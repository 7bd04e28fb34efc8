//! Billing error types

use thiserror::Error;

/// Result alias for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the billing core
///
/// Anything on the asynchronous webhook path is caught by the caller and
/// converted into a provider ACK; only authentication failures surface as
/// an HTTP error. Synchronous tenant-initiated paths (upgrade preview,
/// overage report) surface these directly so the caller can correct input.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(String),

    #[error("webhook credentials rejected")]
    AuthenticationFailed,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("invalid upgrade request: {0}")]
    InvalidUpgrade(String),

    #[error("subscription was modified by another process, retry: {0}")]
    ConcurrentModification(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("activation token invalid or already used")]
    ActivationTokenInvalid,

    #[error("email dispatch failed: {0}")]
    EmailDispatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

/// Why a provider adapter refused a raw webhook payload
///
/// `AuthenticationFailed` must become a 401 at the HTTP boundary; every
/// other reason is logged and ACKed with a 200 so the provider stops
/// retrying a payload we will never be able to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// Shared secret / signature check failed
    AuthenticationFailed,
    /// Body was not parseable as the provider's schema
    Malformed(String),
}

impl RejectionReason {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, RejectionReason::AuthenticationFailed)
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::AuthenticationFailed => write!(f, "authentication failed"),
            RejectionReason::Malformed(detail) => write!(f, "malformed payload: {}", detail),
        }
    }
}
