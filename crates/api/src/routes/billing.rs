//! Tenant-facing billing routes
//!
//! Synchronous routes where errors surface to the caller as real HTTP
//! statuses, unlike the always-ACK webhook path. Tenant identity comes
//! from the upstream auth layer as a header.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::Json;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use coachdesk_billing::{ProrationQuote, Subscription};
use coachdesk_shared::PlanTier;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant identity extracted from the gateway-provided header
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(ApiError::Unauthorized)?;

        Ok(Self { tenant_id })
    }
}

/// GET /billing/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .find_latest(tenant.tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no subscription for this account".to_string()))?;

    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct UpgradePreviewRequest {
    pub target_tier: String,
}

/// POST /billing/upgrade/preview
pub async fn preview_upgrade(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<UpgradePreviewRequest>,
) -> ApiResult<Json<ProrationQuote>> {
    let target = PlanTier::parse(&request.target_tier).ok_or_else(|| {
        ApiError::BadRequest(format!("unknown plan: {}", request.target_tier))
    })?;

    let subscription = state
        .billing
        .subscriptions
        .find_live(tenant.tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no live subscription to upgrade".to_string()))?;

    let active_students = state
        .billing
        .accounts
        .count_active_students(tenant.tenant_id)
        .await?;

    state.billing.proration.validate_upgrade(
        subscription.plan_tier,
        target,
        subscription.billing_period,
        active_students,
    )?;

    let quote = state
        .billing
        .proration
        .calculate_proration(
            subscription.plan_tier,
            target,
            subscription.billing_period,
            subscription.current_period_end,
            OffsetDateTime::now_utc(),
        )?
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "{} -> {} is not an upgrade",
                subscription.plan_tier, target
            ))
        })?;

    Ok(Json(quote))
}

/// GET /billing/overage
pub async fn get_overage(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> ApiResult<Json<coachdesk_billing::OverageReport>> {
    let subscription = state
        .billing
        .subscriptions
        .find_live(tenant.tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no live subscription".to_string()))?;

    let active_students = state
        .billing
        .accounts
        .count_active_students(tenant.tenant_id)
        .await?;

    let report = state.billing.overage.report(&subscription, active_students);
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub token: String,
}

/// POST /activate
///
/// Consumes a pending-activation token: creates the tenant account and
/// opens the subscription the parked purchase paid for.
pub async fn activate(
    State(state): State<AppState>,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .activate_account(&request.token)
        .await?;

    Ok(Json(subscription))
}
