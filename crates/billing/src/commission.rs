//! Affiliate commission classification
//!
//! Commission is owed on the first charge of a subscription lifecycle
//! only. Renewals are 100% retained by the platform; that is a hard
//! business invariant, not a default.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{BillingEventKind, CanonicalBillingEvent};

/// Party label providers use for the affiliate entry in a breakdown
const AFFILIATE_PARTY: &str = "affiliate";

/// Pure classification and computation rules
#[derive(Debug, Clone)]
pub struct CommissionClassifier {
    /// Fallback percentage of the total price, applied when the payload
    /// carries no explicit breakdown. 0.45 means 45%.
    percentage: Decimal,
}

impl CommissionClassifier {
    pub fn new(percentage: Decimal) -> Self {
        Self { percentage }
    }

    /// Fallback percentage from `COMMISSION_PERCENTAGE` (e.g. "0.45")
    pub fn from_env() -> Self {
        let percentage = std::env::var("COMMISSION_PERCENTAGE")
            .ok()
            .and_then(|v| v.parse::<Decimal>().ok())
            .unwrap_or_else(|| Decimal::new(45, 2));
        Self::new(percentage)
    }

    /// Whether this event represents the first charge of its lifecycle.
    ///
    /// A renewal is never a first charge, whatever the payload carries;
    /// the event kind alone rules it out, since providers are free to
    /// omit the subscription object on renewal webhooks. Otherwise: no
    /// subscription object means a one-time purchase, always a first
    /// charge; with a subscription present, only a charge counter of
    /// exactly 1 qualifies, and an absent counter is treated as a first
    /// charge since providers omit it on initial purchases.
    pub fn is_first_charge(&self, event: &CanonicalBillingEvent) -> bool {
        if event.kind == BillingEventKind::Renewed {
            return false;
        }
        match &event.subscription {
            None => true,
            Some(sub) => match sub.charge_count {
                Some(n) => n == 1,
                None => true,
            },
        }
    }

    /// Commission owed for this event.
    ///
    /// Zero for anything that is not a first charge, regardless of what
    /// the payload's breakdown says. First charges use the
    /// affiliate-tagged breakdown entry verbatim when one exists,
    /// otherwise `total × percentage` rounded to two decimals.
    pub fn compute_commission(&self, event: &CanonicalBillingEvent) -> Decimal {
        if !self.is_first_charge(event) {
            return Decimal::ZERO;
        }

        if let Some(entry) = event
            .commissions
            .iter()
            .find(|c| c.party == AFFILIATE_PARTY)
        {
            return entry.amount;
        }

        (event.amount * self.percentage).round_dp(2)
    }
}

/// Persists classifier decisions for audit
#[derive(Clone)]
pub struct CommissionService {
    pool: PgPool,
    classifier: CommissionClassifier,
}

impl CommissionService {
    pub fn new(pool: PgPool, classifier: CommissionClassifier) -> Self {
        Self { pool, classifier }
    }

    pub fn classifier(&self) -> &CommissionClassifier {
        &self.classifier
    }

    /// Classify the event and append the decision to the commissions
    /// table. Idempotency is provided upstream by the dedup ledger, so a
    /// plain append is safe here.
    pub async fn record_for_event(
        &self,
        tenant_id: Uuid,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<Decimal> {
        let first_charge = self.classifier.is_first_charge(event);
        let amount = self.classifier.compute_commission(event);

        sqlx::query(
            r#"
            INSERT INTO commissions
                (tenant_id, provider, external_transaction_id, is_first_charge,
                 total_amount, commission_amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(tenant_id)
        .bind(event.provider)
        .bind(&event.external_transaction_id)
        .bind(first_charge)
        .bind(event.amount)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            provider = %event.provider,
            external_transaction_id = %event.external_transaction_id,
            first_charge = first_charge,
            commission = %amount,
            "Commission recorded"
        );

        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CodeResolution;
    use crate::events::{BillingEventKind, CommissionEntry, EventSubscription, Provider};
    use coachdesk_shared::{BillingPeriod, PlanTier};
    use time::OffsetDateTime;

    fn event(
        charge_count: Option<i32>,
        with_subscription: bool,
        commissions: Vec<CommissionEntry>,
    ) -> CanonicalBillingEvent {
        CanonicalBillingEvent {
            provider: Provider::Kiwify,
            external_transaction_id: "tx-1".to_string(),
            external_order_id: None,
            kind: BillingEventKind::Purchased,
            customer_email: "coach@example.com".to_string(),
            customer_name: None,
            plan_tier: PlanTier::Starter,
            billing_period: BillingPeriod::Monthly,
            plan_resolution: CodeResolution::Exact,
            amount: Decimal::new(9700, 2),
            subscription: with_subscription.then(|| EventSubscription {
                external_subscription_id: Some("sub-1".to_string()),
                charge_count,
            }),
            commissions,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    fn classifier() -> CommissionClassifier {
        CommissionClassifier::new(Decimal::new(45, 2))
    }

    #[test]
    fn one_time_purchase_is_always_first_charge() {
        let e = event(None, false, vec![]);
        assert!(classifier().is_first_charge(&e));
    }

    #[test]
    fn charge_counter_of_one_is_first_charge() {
        let e = event(Some(1), true, vec![]);
        assert!(classifier().is_first_charge(&e));
    }

    #[test]
    fn later_charges_are_not_first() {
        let e = event(Some(2), true, vec![]);
        assert!(!classifier().is_first_charge(&e));
    }

    #[test]
    fn breakdown_entry_used_verbatim() {
        let e = event(
            Some(1),
            true,
            vec![CommissionEntry {
                party: "affiliate".to_string(),
                amount: Decimal::new(4365, 2),
            }],
        );
        assert_eq!(classifier().compute_commission(&e), Decimal::new(4365, 2));
    }

    #[test]
    fn percentage_fallback_without_breakdown() {
        let e = event(Some(1), true, vec![]);
        // 97.00 * 0.45 = 43.65
        assert_eq!(classifier().compute_commission(&e), Decimal::new(4365, 2));
    }

    #[test]
    fn renewed_event_is_never_first_charge() {
        // Renewal webhooks may omit the subscription object entirely;
        // the kind alone must keep the charge out of commission.
        let mut e = event(None, false, vec![]);
        e.kind = BillingEventKind::Renewed;
        assert!(!classifier().is_first_charge(&e));
        assert_eq!(classifier().compute_commission(&e), Decimal::ZERO);
    }

    #[test]
    fn renewed_event_with_counter_one_earns_nothing() {
        let mut e = event(Some(1), true, vec![]);
        e.kind = BillingEventKind::Renewed;
        assert_eq!(classifier().compute_commission(&e), Decimal::ZERO);
    }

    #[test]
    fn reactivation_follows_the_counter_rule() {
        // Only renewals are excluded by kind; a reactivation with a
        // first-charge counter still pays.
        let mut e = event(Some(1), true, vec![]);
        e.kind = BillingEventKind::Reactivated;
        assert!(classifier().is_first_charge(&e));

        let mut e = event(Some(3), true, vec![]);
        e.kind = BillingEventKind::Reactivated;
        assert_eq!(classifier().compute_commission(&e), Decimal::ZERO);
    }

    #[test]
    fn renewal_commission_is_zero_even_with_breakdown() {
        let e = event(
            Some(2),
            true,
            vec![CommissionEntry {
                party: "affiliate".to_string(),
                amount: Decimal::new(4365, 2),
            }],
        );
        assert_eq!(classifier().compute_commission(&e), Decimal::ZERO);
    }

    #[test]
    fn non_affiliate_entries_are_ignored() {
        let e = event(
            Some(1),
            true,
            vec![CommissionEntry {
                party: "producer".to_string(),
                amount: Decimal::new(5335, 2),
            }],
        );
        // Falls back to percentage since no affiliate entry exists
        assert_eq!(classifier().compute_commission(&e), Decimal::new(4365, 2));
    }
}
