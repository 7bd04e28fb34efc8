//! Billing Invariants Module
//!
//! Provides runnable consistency checks for the billing system.
//! These invariants can be run after any mutation or webhook replay to ensure
//! the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write
//! 4. **Complete**: Covers all critical billing consistency requirements

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Tenant(s) affected
    pub tenant_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - system may be charging incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for multiple live subscriptions violation
#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    tenant_id: Uuid,
    sub_count: i64,
}

/// Row type for negative accumulation violation
#[derive(Debug, sqlx::FromRow)]
struct NegativeAccumulationRow {
    sub_id: Uuid,
    tenant_id: Uuid,
    accumulated_extra_students: i32,
    accumulated_extra_charge: rust_decimal::Decimal,
}

/// Row type for closed subscription without period end violation
#[derive(Debug, sqlx::FromRow)]
struct ClosedNoPeriodEndRow {
    sub_id: Uuid,
    tenant_id: Uuid,
    status: String,
}

/// Row type for activated-but-pending token violation
#[derive(Debug, sqlx::FromRow)]
struct ReusableTokenRow {
    activation_id: Uuid,
    customer_email: String,
    status: String,
}

/// Row type for duplicate processed events violation
#[derive(Debug, sqlx::FromRow)]
struct DuplicateEventRow {
    provider: String,
    external_transaction_id: String,
    event_count: i64,
}

/// Row type for commission-on-renewal violation
#[derive(Debug, sqlx::FromRow)]
struct RenewalCommissionRow {
    tenant_id: Uuid,
    external_transaction_id: String,
    commission_amount: rust_decimal::Decimal,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        // Run all checks
        violations.extend(self.check_single_live_subscription().await?);
        violations.extend(self.check_non_negative_accumulation().await?);
        violations.extend(self.check_closed_has_period_end().await?);
        violations.extend(self.check_activated_tokens_not_pending().await?);
        violations.extend(self.check_processed_event_uniqueness().await?);
        violations.extend(self.check_zero_commission_on_renewal().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 live subscription per tenant
    ///
    /// Having multiple live subscriptions would cause double-billing
    /// and entitlement confusion.
    async fn check_single_live_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status IN ('trial', 'active', 'past_due')
            GROUP BY tenant_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_live_subscription".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Tenant has {} live subscriptions (expected 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Accumulated overage is never negative
    ///
    /// The accumulator only adds and the renewal reset zeroes; a
    /// negative total means a write bypassed both paths.
    async fn check_non_negative_accumulation(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeAccumulationRow> = sqlx::query_as(
            r#"
            SELECT
                s.id as sub_id,
                s.tenant_id,
                s.accumulated_extra_students,
                s.accumulated_extra_charge
            FROM subscriptions s
            WHERE s.accumulated_extra_students < 0
               OR s.accumulated_extra_charge < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "non_negative_accumulation".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Subscription has negative accumulation ({} students, {} charge)",
                    row.accumulated_extra_students, row.accumulated_extra_charge
                ),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "accumulated_extra_students": row.accumulated_extra_students,
                    "accumulated_extra_charge": row.accumulated_extra_charge.to_string(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Canceled/expired subscriptions retain a period end
    ///
    /// Cancellation keeps access until the paid-for period end; a closed
    /// row without one means we cannot tell when to revoke access.
    async fn check_closed_has_period_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ClosedNoPeriodEndRow> = sqlx::query_as(
            r#"
            SELECT
                s.id as sub_id,
                s.tenant_id,
                s.status
            FROM subscriptions s
            WHERE s.status IN ('canceled', 'expired')
              AND s.current_period_end IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "closed_has_period_end".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: "Closed subscription has no period_end date".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "status": row.status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Activated tokens never revert to pending
    ///
    /// Token consumption is single-shot; a token that is both consumed
    /// and pending would let one payment open two accounts.
    async fn check_activated_tokens_not_pending(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ReusableTokenRow> = sqlx::query_as(
            r#"
            SELECT
                pa.id as activation_id,
                pa.customer_email,
                pa.status
            FROM pending_activations pa
            WHERE pa.activated_at IS NOT NULL
              AND pa.status != 'activated'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "activated_tokens_not_pending".to_string(),
                tenant_ids: vec![],
                description: format!(
                    "Activation for '{}' was consumed but is in status '{}'",
                    row.customer_email, row.status
                ),
                context: serde_json::json!({
                    "activation_id": row.activation_id,
                    "status": row.status,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: Processed-event uniqueness sanity
    ///
    /// The unique constraint should make duplicates impossible; this
    /// check exists to catch a migration or constraint drop.
    async fn check_processed_event_uniqueness(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateEventRow> = sqlx::query_as(
            r#"
            SELECT provider, external_transaction_id, COUNT(*) as event_count
            FROM processed_events
            GROUP BY provider, external_transaction_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "processed_event_uniqueness".to_string(),
                tenant_ids: vec![],
                description: format!(
                    "Transaction '{}' from {} appears {} times in the dedup ledger",
                    row.external_transaction_id, row.provider, row.event_count
                ),
                context: serde_json::json!({
                    "provider": row.provider,
                    "external_transaction_id": row.external_transaction_id,
                    "event_count": row.event_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 6: Renewal charges carry zero commission
    ///
    /// Commission is owed on first charges only; a non-zero renewal
    /// commission means the classifier rule was bypassed.
    async fn check_zero_commission_on_renewal(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<RenewalCommissionRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, external_transaction_id, commission_amount
            FROM commissions
            WHERE is_first_charge = false
              AND commission_amount != 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "zero_commission_on_renewal".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Renewal transaction '{}' recorded commission {}",
                    row.external_transaction_id, row.commission_amount
                ),
                context: serde_json::json!({
                    "external_transaction_id": row.external_transaction_id,
                    "commission_amount": row.commission_amount.to_string(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_live_subscription" => self.check_single_live_subscription().await,
            "non_negative_accumulation" => self.check_non_negative_accumulation().await,
            "closed_has_period_end" => self.check_closed_has_period_end().await,
            "activated_tokens_not_pending" => self.check_activated_tokens_not_pending().await,
            "processed_event_uniqueness" => self.check_processed_event_uniqueness().await,
            "zero_commission_on_renewal" => self.check_zero_commission_on_renewal().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_live_subscription",
            "non_negative_accumulation",
            "closed_has_period_end",
            "activated_tokens_not_pending",
            "processed_event_uniqueness",
            "zero_commission_on_renewal",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"single_live_subscription"));
        assert!(checks.contains(&"zero_commission_on_renewal"));
    }
}
