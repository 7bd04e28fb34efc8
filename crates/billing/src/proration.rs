//! Upgrade proration
//!
//! Quotes the one-off amount owed when a tenant moves to a more
//! expensive plan mid-cycle. The credit model is linear over the nominal
//! cycle length: the tenant pays the price difference scaled by the
//! unused fraction of the current period.

use rust_decimal::Decimal;
use time::OffsetDateTime;

use coachdesk_shared::{BillingPeriod, PlanTier};

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};

/// A priced upgrade offer, valid at the moment it was computed
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProrationQuote {
    pub from_tier: PlanTier,
    pub to_tier: PlanTier,
    pub billing_period: BillingPeriod,
    /// Whole days left in the current period, never negative
    pub days_remaining: i64,
    pub total_days: i64,
    /// One-off charge for the rest of the period, two decimal places
    pub amount_due: Decimal,
    /// Student limit gained by the move
    pub additional_students: i32,
}

/// Pure proration math over the plan catalog
#[derive(Debug, Clone)]
pub struct ProrationCalculator {
    catalog: PlanCatalog,
}

impl ProrationCalculator {
    pub fn new(catalog: PlanCatalog) -> Self {
        Self { catalog }
    }

    /// Whole days remaining in the period, rounded up so a partial day
    /// still counts. Expired periods quote as zero rather than negative.
    fn days_remaining(now: OffsetDateTime, period_end: OffsetDateTime) -> i64 {
        let remaining = period_end - now;
        if remaining.is_negative() {
            return 0;
        }
        let secs = remaining.whole_seconds();
        (secs + 86_399) / 86_400
    }

    /// Quote the upgrade from `current_tier` to `target_tier` within the
    /// same billing period. Returns `None` when the move is not an
    /// upgrade in price, which the caller treats as "nothing to charge".
    pub fn calculate_proration(
        &self,
        current_tier: PlanTier,
        target_tier: PlanTier,
        period: BillingPeriod,
        period_end: OffsetDateTime,
        now: OffsetDateTime,
    ) -> BillingResult<Option<ProrationQuote>> {
        let current = self.catalog.get(current_tier);
        let target = self.catalog.get(target_tier);

        let current_price = current.price(period);
        let target_price = target.price(period);
        if target_price <= current_price {
            return Ok(None);
        }

        let total_days = period.nominal_days();
        let days_remaining = Self::days_remaining(now, period_end).min(total_days);

        let fraction = Decimal::from(days_remaining) / Decimal::from(total_days);
        let amount_due = ((target_price - current_price) * fraction).round_dp(2);

        Ok(Some(ProrationQuote {
            from_tier: current_tier,
            to_tier: target_tier,
            billing_period: period,
            days_remaining,
            total_days,
            amount_due,
            additional_students: target.student_limit(period) - current.student_limit(period),
        }))
    }

    /// Reject moves that are not genuine upgrades before quoting them.
    ///
    /// Downgrades and lateral moves are refused outright; so is any
    /// target whose student limit cannot hold the tenant's current
    /// roster, since the upgrade would immediately put them over limit.
    pub fn validate_upgrade(
        &self,
        current_tier: PlanTier,
        target_tier: PlanTier,
        period: BillingPeriod,
        active_students: i32,
    ) -> BillingResult<()> {
        if target_tier.order() <= current_tier.order() {
            return Err(BillingError::InvalidUpgrade(format!(
                "{} -> {} is not an upgrade",
                current_tier.as_str(),
                target_tier.as_str()
            )));
        }

        let target = self.catalog.get(target_tier);
        if target.student_limit(period) < active_students {
            return Err(BillingError::InvalidUpgrade(format!(
                "target plan allows {} students but tenant has {}",
                target.student_limit(period),
                active_students
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn calc() -> ProrationCalculator {
        ProrationCalculator::new(PlanCatalog::builtin())
    }

    fn quote_at(
        from: PlanTier,
        to: PlanTier,
        period: BillingPeriod,
        days_left: i64,
    ) -> Option<ProrationQuote> {
        let now = OffsetDateTime::now_utc();
        calc()
            .calculate_proration(from, to, period, now + Duration::days(days_left), now)
            .unwrap()
    }

    #[test]
    fn halfway_through_monthly_starter_to_pro() {
        let quote = quote_at(PlanTier::Starter, PlanTier::Pro, BillingPeriod::Monthly, 15)
            .unwrap();

        // (147.00 - 97.00) * 15/30 = 25.00
        assert_eq!(quote.amount_due, Decimal::new(2500, 2));
        assert_eq!(quote.days_remaining, 15);
        assert_eq!(quote.total_days, 30);
        assert_eq!(quote.additional_students, 25);
    }

    #[test]
    fn annual_upgrade_uses_365_day_cycle() {
        let quote = quote_at(PlanTier::Pro, PlanTier::Elite, BillingPeriod::Annual, 365)
            .unwrap();

        // Full period remaining: the whole price difference
        assert_eq!(quote.amount_due, Decimal::new(100_000, 2));
        assert_eq!(quote.total_days, 365);
    }

    #[test]
    fn downgrade_quotes_nothing() {
        assert!(quote_at(PlanTier::Pro, PlanTier::Starter, BillingPeriod::Monthly, 15).is_none());
    }

    #[test]
    fn expired_period_quotes_zero() {
        let quote = quote_at(PlanTier::Starter, PlanTier::Pro, BillingPeriod::Monthly, -3)
            .unwrap();
        assert_eq!(quote.days_remaining, 0);
        assert_eq!(quote.amount_due, Decimal::ZERO);
    }

    #[test]
    fn amount_is_monotonic_in_days_remaining() {
        let mut last = Decimal::MIN;
        for days in 0..=30 {
            let quote =
                quote_at(PlanTier::Starter, PlanTier::Elite, BillingPeriod::Monthly, days)
                    .unwrap();
            assert!(quote.amount_due >= last);
            last = quote.amount_due;
        }
    }

    #[test]
    fn validate_rejects_downgrade_and_lateral() {
        let c = calc();
        assert!(matches!(
            c.validate_upgrade(PlanTier::Pro, PlanTier::Starter, BillingPeriod::Monthly, 5),
            Err(BillingError::InvalidUpgrade(_))
        ));
        assert!(matches!(
            c.validate_upgrade(PlanTier::Pro, PlanTier::Pro, BillingPeriod::Monthly, 5),
            Err(BillingError::InvalidUpgrade(_))
        ));
    }

    #[test]
    fn validate_rejects_target_too_small_for_roster() {
        // Pro monthly allows 40 students
        let err = calc()
            .validate_upgrade(PlanTier::Starter, PlanTier::Pro, BillingPeriod::Monthly, 45)
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidUpgrade(_)));
    }

    #[test]
    fn validate_accepts_real_upgrade() {
        assert!(calc()
            .validate_upgrade(PlanTier::Starter, PlanTier::Elite, BillingPeriod::Annual, 60)
            .is_ok());
    }
}
