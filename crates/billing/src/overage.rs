//! Extra-student overage accumulation
//!
//! Tenants may exceed their plan's included-student limit; the excess is
//! billed per student at the plan's snapshot rate. Accumulation is
//! change-driven: the hourly recompute only writes when the computed
//! extra-student count differs from the last usage entry in the current
//! period, so a stable roster produces no duplicate charges. The
//! accumulated charge is settled (and reset) at the next renewal.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use coachdesk_shared::PlanTier;

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::Subscription;

/// Snapshot of a tenant's position against their limit
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OverageReport {
    pub active_students: i32,
    pub student_limit: i32,
    /// Students over the limit, never negative
    pub extra_students: i32,
    /// Charge for the current excess at the snapshot per-student rate
    pub current_charge: Decimal,
    /// Total accumulated this period, settled at renewal
    pub accumulated_charge: Decimal,
    pub recommendation: Option<TierRecommendation>,
}

/// Suggestion to move up a tier when overage outgrows the plan
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TierRecommendation {
    pub recommended_tier: PlanTier,
    /// What the excess would cost on the recommended tier
    pub projected_overage: Decimal,
    /// Per-cycle saving versus staying put (can be negative)
    pub projected_savings: Decimal,
}

/// Outcome of a change-driven recompute pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// Extra count unchanged since the last usage entry; nothing written
    Unchanged,
    /// Usage entry appended and accumulation updated
    Recorded { extra_students: i32 },
}

impl RecomputeOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

pub struct OverageService {
    pool: PgPool,
    catalog: PlanCatalog,
}

impl OverageService {
    pub fn new(pool: PgPool, catalog: PlanCatalog) -> Self {
        Self { pool, catalog }
    }

    /// Pure excess math: students over the limit and what they cost
    pub fn calculate_overage(
        active_students: i32,
        student_limit: i32,
        extra_student_price: Decimal,
    ) -> (i32, Decimal) {
        let extra = (active_students - student_limit).max(0);
        (extra, Decimal::from(extra) * extra_student_price)
    }

    /// Build the tenant-facing report for the current roster size
    pub fn report(&self, subscription: &Subscription, active_students: i32) -> OverageReport {
        let (extra, charge) = Self::calculate_overage(
            active_students,
            subscription.student_limit,
            subscription.extra_student_price,
        );

        OverageReport {
            active_students,
            student_limit: subscription.student_limit,
            extra_students: extra,
            current_charge: charge,
            accumulated_charge: subscription.accumulated_extra_charge,
            recommendation: Self::recommend(&self.catalog, subscription, active_students, extra),
        }
    }

    /// Recommend the next tier up when the excess is more than 10% of
    /// the limit, or the period's accumulated charge has reached half
    /// the plan price. Savings compare plan price plus overage on each
    /// tier for the same roster.
    fn recommend(
        catalog: &PlanCatalog,
        subscription: &Subscription,
        active_students: i32,
        extra_students: i32,
    ) -> Option<TierRecommendation> {
        let excess_ratio = Decimal::from(extra_students)
            / Decimal::from(subscription.student_limit.max(1));
        let charge_ratio = if subscription.price > Decimal::ZERO {
            subscription.accumulated_extra_charge / subscription.price
        } else {
            Decimal::ZERO
        };

        if excess_ratio <= Decimal::new(10, 2) && charge_ratio <= Decimal::new(50, 2) {
            return None;
        }

        let next = catalog.next_tier_above(subscription.plan_tier)?;
        let next_limit = next.student_limit(subscription.billing_period);
        let (_, projected_overage) = Self::calculate_overage(
            active_students,
            next_limit,
            next.extra_student_price,
        );

        let current_cost = subscription.price
            + Decimal::from(extra_students) * subscription.extra_student_price;
        let next_cost = next.price(subscription.billing_period) + projected_overage;

        Some(TierRecommendation {
            recommended_tier: next.tier,
            projected_overage,
            projected_savings: (current_cost - next_cost).round_dp(2),
        })
    }

    /// Change-driven accumulation for one tenant.
    ///
    /// Compares the computed extra count against the period's last usage
    /// entry; on change, appends a usage entry and, when the count grew,
    /// adds the newly exceeded students to the accumulated charge. The
    /// subscription update is guarded by the version column. Shrinking
    /// rosters are recorded but never refunded mid-period.
    pub async fn recompute(
        &self,
        subscription: &Subscription,
        active_students: i32,
    ) -> BillingResult<RecomputeOutcome> {
        let (extra, _) = Self::calculate_overage(
            active_students,
            subscription.student_limit,
            subscription.extra_student_price,
        );

        let last_extra: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT extra_students FROM usage_log
            WHERE subscription_id = $1 AND recorded_at >= $2
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.current_period_start)
        .fetch_optional(&self.pool)
        .await?;

        let previous = last_extra.map(|(n,)| n).unwrap_or(0);
        if extra == previous {
            return Ok(RecomputeOutcome::Unchanged);
        }

        let newly_exceeded = (extra - previous).max(0);
        let added_charge =
            Decimal::from(newly_exceeded) * subscription.extra_student_price;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET accumulated_extra_students = $2,
                accumulated_extra_charge = accumulated_extra_charge + $3,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $4
            "#,
        )
        .bind(subscription.id)
        .bind(extra.max(subscription.accumulated_extra_students))
        .bind(added_charge)
        .bind(subscription.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::ConcurrentModification(
                subscription.id.to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO usage_log
                (subscription_id, tenant_id, active_students, student_limit,
                 extra_students, charge_delta)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.tenant_id)
        .bind(active_students)
        .bind(subscription.student_limit)
        .bind(extra)
        .bind(added_charge)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %subscription.tenant_id,
            extra_students = extra,
            previous_extra = previous,
            added_charge = %added_charge,
            "Overage recomputed"
        );

        Ok(RecomputeOutcome::Recorded {
            extra_students: extra,
        })
    }

    /// Zero the period's accumulation. Runs inside the renewal
    /// transaction, after the version-checked period advance has
    /// settled the accumulated charge.
    pub async fn reset_accumulation(
        conn: &mut sqlx::PgConnection,
        subscription_id: Uuid,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET accumulated_extra_students = 0,
                accumulated_extra_charge = 0,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .execute(conn)
        .await?;

        tracing::debug!(subscription_id = %subscription_id, "Accumulation reset");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachdesk_shared::BillingPeriod;

    #[test]
    fn excess_over_starter_limit() {
        // Starter monthly: 15 included, 6.47 per extra
        let (extra, charge) =
            OverageService::calculate_overage(20, 15, Decimal::new(647, 2));
        assert_eq!(extra, 5);
        assert_eq!(charge, Decimal::new(3235, 2));
    }

    #[test]
    fn at_or_below_limit_costs_nothing() {
        let price = Decimal::new(647, 2);
        let (extra, charge) = OverageService::calculate_overage(15, 15, price);
        assert_eq!(extra, 0);
        assert_eq!(charge, Decimal::ZERO);

        let (extra, charge) = OverageService::calculate_overage(3, 15, price);
        assert_eq!(extra, 0);
        assert_eq!(charge, Decimal::ZERO);
    }

    fn starter_subscription(accumulated: Decimal) -> Subscription {
        Subscription::for_tests(
            PlanTier::Starter,
            BillingPeriod::Monthly,
            Decimal::new(9700, 2),
            15,
            Decimal::new(647, 2),
            accumulated,
        )
    }

    #[test]
    fn small_excess_gets_no_recommendation() {
        let catalog = PlanCatalog::builtin();
        let sub = starter_subscription(Decimal::ZERO);
        // 16 of 15: ~6.7% over, under both thresholds
        assert!(OverageService::recommend(&catalog, &sub, 16, 1).is_none());
    }

    #[test]
    fn large_excess_recommends_next_tier() {
        let catalog = PlanCatalog::builtin();
        let sub = starter_subscription(Decimal::ZERO);

        // 20 of 15: 33% over the limit
        let rec = OverageService::recommend(&catalog, &sub, 20, 5).unwrap();
        assert_eq!(rec.recommended_tier, PlanTier::Pro);
        assert_eq!(rec.projected_overage, Decimal::ZERO);
        // Staying: 97.00 + 5 * 6.47 = 129.35; moving: 147.00
        assert_eq!(rec.projected_savings, Decimal::new(-1765, 2));
    }

    #[test]
    fn heavy_accumulation_triggers_recommendation() {
        let catalog = PlanCatalog::builtin();
        // 55.00 accumulated against a 97.00 plan is past the 50% mark
        let sub = starter_subscription(Decimal::new(5500, 2));
        assert!(OverageService::recommend(&catalog, &sub, 15, 0).is_some());
    }

    #[test]
    fn top_tier_has_nothing_to_recommend() {
        let catalog = PlanCatalog::builtin();
        let sub = Subscription::for_tests(
            PlanTier::Elite,
            BillingPeriod::Monthly,
            Decimal::new(24700, 2),
            120,
            Decimal::new(397, 2),
            Decimal::ZERO,
        );
        assert!(OverageService::recommend(&catalog, &sub, 160, 40).is_none());
    }
}
