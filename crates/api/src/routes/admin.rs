//! Operational admin routes
//!
//! Read-only consistency checks over billing data. These sit behind the
//! gateway's admin scope; the handlers themselves do no auth.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use coachdesk_billing::{InvariantCheckSummary, InvariantChecker};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /admin/invariants
pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let summary = state.billing.invariants.run_all_checks().await?;

    if !summary.healthy {
        tracing::warn!(
            checks_failed = summary.checks_failed,
            violations = summary.violations.len(),
            "Invariant check found violations"
        );
    }

    Ok(Json(summary))
}

/// GET /admin/invariants/{name}
pub async fn run_invariant(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !InvariantChecker::available_checks().contains(&name.as_str()) {
        return Err(ApiError::NotFound(format!("unknown check: {name}")));
    }

    let violations = state.billing.invariants.run_check(&name).await?;

    Ok(Json(json!({
        "check": name,
        "passed": violations.is_empty(),
        "violations": violations,
    })))
}
