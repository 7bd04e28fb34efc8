//! Subscription state machine
//!
//! All mutation of a tenant's subscription funnels through here, driven
//! by canonical billing events the adapters produced. Two rules hold
//! everywhere:
//!
//! 1. Every status/period/accumulation write is a version-checked
//!    UPDATE; a stale version means another process got there first and
//!    the caller retries against fresh state.
//! 2. Emails go out after commit, fire-and-forget. A failed email never
//!    rolls back a billing mutation.
//!
//! Period windows always restart from the processing moment using
//! calendar month/year addition, so a late-arriving renewal grants a
//! full cycle from now rather than back-dating.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use coachdesk_shared::{BillingPeriod, PlanTier, SubscriptionStatus};

use crate::accounts::AccountService;
use crate::activation::ActivationService;
use crate::catalog::{CodeResolution, PlanCatalog};
use crate::commission::CommissionService;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEventKind, CanonicalBillingEvent, Provider};
use crate::overage::OverageService;

/// A tenant's subscription row
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider: Option<Provider>,
    pub external_subscription_id: Option<String>,
    pub plan_tier: PlanTier,
    pub billing_period: BillingPeriod,
    pub status: SubscriptionStatus,
    /// Price paid at purchase time; catalog updates never re-price this
    pub price: Decimal,
    pub student_limit: i32,
    pub extra_student_price: Decimal,
    pub catalog_version: String,
    /// Set when the plan code only resolved via the lowest-tier fallback
    pub needs_manual_review: bool,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub canceled_at: Option<OffsetDateTime>,
    pub accumulated_extra_students: i32,
    pub accumulated_extra_charge: Decimal,
    /// Optimistic-locking counter, incremented on every update
    pub version: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    #[cfg(test)]
    pub(crate) fn for_tests(
        plan_tier: PlanTier,
        billing_period: BillingPeriod,
        price: Decimal,
        student_limit: i32,
        extra_student_price: Decimal,
        accumulated_extra_charge: Decimal,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider: Some(Provider::Hotmart),
            external_subscription_id: None,
            plan_tier,
            billing_period,
            status: SubscriptionStatus::Active,
            price,
            student_limit,
            extra_student_price,
            catalog_version: "test".to_string(),
            needs_manual_review: false,
            current_period_start: now,
            current_period_end: add_billing_cycle(now, billing_period),
            canceled_at: None,
            accumulated_extra_students: 0,
            accumulated_extra_charge,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What processing a claimed event actually did, reported back to the
/// provider in the webhook ACK body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    SubscriptionOpened,
    PendingActivationCreated,
    SubscriptionRenewed,
    SubscriptionCanceled,
    SubscriptionPastDue,
    SubscriptionReactivated,
    EventIgnored,
}

impl ProcessOutcome {
    pub fn action(&self) -> &'static str {
        match self {
            Self::SubscriptionOpened => "subscription_opened",
            Self::PendingActivationCreated => "pending_activation_created",
            Self::SubscriptionRenewed => "subscription_renewed",
            Self::SubscriptionCanceled => "subscription_canceled",
            Self::SubscriptionPastDue => "subscription_past_due",
            Self::SubscriptionReactivated => "subscription_reactivated",
            Self::EventIgnored => "event_ignored",
        }
    }
}

/// One calendar billing cycle after `from`, clamping the day of month
/// so Jan 31 + 1 month lands on the last day of February.
pub fn add_billing_cycle(from: OffsetDateTime, period: BillingPeriod) -> OffsetDateTime {
    let date = from.date();
    let (target_year, target_month) = match period {
        BillingPeriod::Monthly => match date.month().next() {
            time::Month::January => (date.year() + 1, time::Month::January),
            next => (date.year(), next),
        },
        BillingPeriod::Annual => (date.year() + 1, date.month()),
    };

    let day = date
        .day()
        .min(time::util::days_in_month(target_month, target_year));
    match time::Date::from_calendar_date(target_year, target_month, day) {
        Ok(new_date) => from.replace_date(new_date),
        // Unreachable after clamping, but never panic in billing code
        Err(_) => from + time::Duration::days(period.nominal_days()),
    }
}

pub struct SubscriptionService {
    pool: PgPool,
    catalog: PlanCatalog,
    accounts: AccountService,
    activation: ActivationService,
    commission: CommissionService,
    email: Arc<BillingEmailService>,
}

impl SubscriptionService {
    pub fn new(
        pool: PgPool,
        catalog: PlanCatalog,
        accounts: AccountService,
        activation: ActivationService,
        commission: CommissionService,
        email: Arc<BillingEmailService>,
    ) -> Self {
        Self {
            pool,
            catalog,
            accounts,
            activation,
            commission,
            email,
        }
    }

    /// Apply a claimed canonical event to the tenant's subscription.
    ///
    /// The caller has already won the dedup claim for this transaction;
    /// this method is where the transition table lives.
    pub async fn apply_event(
        &self,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<ProcessOutcome> {
        if event.kind == BillingEventKind::Ignored {
            return Ok(ProcessOutcome::EventIgnored);
        }

        if event.plan_resolution == CodeResolution::Fallback {
            tracing::warn!(
                provider = %event.provider,
                external_transaction_id = %event.external_transaction_id,
                customer_email = %event.customer_email,
                "Event carries fallback-resolved plan - subscription will be flagged for manual review"
            );
        }

        let account = self.accounts.find_by_email(&event.customer_email).await?;

        match event.kind {
            BillingEventKind::Purchased => match account {
                Some(account) => self.handle_purchase(account.id, event).await,
                None => self.park_purchase(event).await,
            },
            BillingEventKind::Renewed => match account {
                Some(account) => self.handle_renewal(account.id, event).await,
                None => {
                    // A renewal for an email we have never seen: park it
                    // like a purchase so the payment is not lost.
                    tracing::warn!(
                        customer_email = %event.customer_email,
                        provider = %event.provider,
                        "Renewal for unknown email - parking as pending activation"
                    );
                    self.park_purchase(event).await
                }
            },
            BillingEventKind::Canceled => {
                let account = account.ok_or_else(|| {
                    BillingError::NotFound(format!("no account for {}", event.customer_email))
                })?;
                self.handle_cancellation(account.id, event).await
            }
            BillingEventKind::Overdue => {
                let account = account.ok_or_else(|| {
                    BillingError::NotFound(format!("no account for {}", event.customer_email))
                })?;
                self.handle_overdue(account.id, event).await
            }
            BillingEventKind::Reactivated => {
                let account = account.ok_or_else(|| {
                    BillingError::NotFound(format!("no account for {}", event.customer_email))
                })?;
                self.handle_reactivation(account.id, event).await
            }
            BillingEventKind::Ignored => Ok(ProcessOutcome::EventIgnored),
        }
    }

    /// Most recent subscription row for the tenant, any status
    pub async fn find_latest(&self, tenant_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// The tenant's live subscription: trial, active, or past due
    pub async fn find_live(&self, tenant_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE tenant_id = $1 AND status IN ('trial', 'active', 'past_due')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// Open (or re-plan) the tenant's subscription for a paid purchase.
    pub async fn handle_purchase(
        &self,
        tenant_id: Uuid,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<ProcessOutcome> {
        let plan = self.catalog.get(event.plan_tier);
        let now = OffsetDateTime::now_utc();
        let period_end = add_billing_cycle(now, event.billing_period);
        let needs_review = event.plan_resolution == CodeResolution::Fallback;
        let external_subscription_id = event
            .subscription
            .as_ref()
            .and_then(|s| s.external_subscription_id.clone());

        match self.find_live(tenant_id).await? {
            Some(existing) => {
                // Trial conversion or plan change: the live row moves to
                // the purchased plan with a fresh period.
                let updated = sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET provider = $2, external_subscription_id = $3,
                        plan_tier = $4, billing_period = $5, status = 'active',
                        price = $6, student_limit = $7, extra_student_price = $8,
                        catalog_version = $9, needs_manual_review = $10,
                        current_period_start = $11, current_period_end = $12,
                        canceled_at = NULL,
                        version = version + 1, updated_at = NOW()
                    WHERE id = $1 AND version = $13
                    "#,
                )
                .bind(existing.id)
                .bind(event.provider)
                .bind(&external_subscription_id)
                .bind(event.plan_tier)
                .bind(event.billing_period)
                .bind(event.amount)
                .bind(plan.student_limit(event.billing_period))
                .bind(plan.extra_student_price)
                .bind(self.catalog.version())
                .bind(needs_review)
                .bind(now)
                .bind(period_end)
                .bind(existing.version)
                .execute(&self.pool)
                .await?;

                if updated.rows_affected() == 0 {
                    return Err(BillingError::ConcurrentModification(existing.id.to_string()));
                }
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO subscriptions
                        (tenant_id, provider, external_subscription_id, plan_tier,
                         billing_period, status, price, student_limit,
                         extra_student_price, catalog_version, needs_manual_review,
                         current_period_start, current_period_end)
                    VALUES ($1, $2, $3, $4, $5, 'active', $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(tenant_id)
                .bind(event.provider)
                .bind(&external_subscription_id)
                .bind(event.plan_tier)
                .bind(event.billing_period)
                .bind(event.amount)
                .bind(plan.student_limit(event.billing_period))
                .bind(plan.extra_student_price)
                .bind(self.catalog.version())
                .bind(needs_review)
                .bind(now)
                .bind(period_end)
                .execute(&self.pool)
                .await?;
            }
        }

        self.commission.record_for_event(tenant_id, event).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            plan_tier = %event.plan_tier,
            billing_period = %event.billing_period,
            amount = %event.amount,
            "Subscription opened"
        );

        let email = Arc::clone(&self.email);
        let to = event.customer_email.clone();
        let name = event.customer_name.clone();
        let plan_name = plan.name.clone();
        tokio::spawn(async move {
            if let Err(e) = email
                .send_purchase_confirmation(&to, name.as_deref(), &plan_name)
                .await
            {
                tracing::error!(to = %to, error = %e, "Failed to send purchase confirmation");
            }
        });

        Ok(ProcessOutcome::SubscriptionOpened)
    }

    /// Park a payment for an email with no account: pending activation
    /// plus an activation link, so the money is never dropped.
    async fn park_purchase(
        &self,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<ProcessOutcome> {
        let token = self
            .activation
            .create(
                &event.customer_email,
                event.customer_name.as_deref(),
                event.plan_tier,
                event.billing_period,
                event.amount,
                event.provider,
                &event.external_transaction_id,
            )
            .await?;

        let email = Arc::clone(&self.email);
        let to = event.customer_email.clone();
        tokio::spawn(async move {
            if let Err(e) = email.send_activation_link(&to, &token).await {
                tracing::error!(to = %to, error = %e, "Failed to send activation link");
            }
        });

        Ok(ProcessOutcome::PendingActivationCreated)
    }

    /// Renewal: back to active, fresh period from now, accumulation
    /// settled and reset in the same transaction. Renewals never touch
    /// the commission table.
    async fn handle_renewal(
        &self,
        tenant_id: Uuid,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<ProcessOutcome> {
        let Some(existing) = self.find_live(tenant_id).await? else {
            // Renewal with no live row, e.g. after an expiry sweep beat
            // the provider's charge. Reopen through the purchase path;
            // the classifier's renewal rule keeps the commission at zero.
            tracing::warn!(
                tenant_id = %tenant_id,
                "Renewal without a live subscription - reopening"
            );
            return self.handle_purchase(tenant_id, event).await;
        };

        let now = OffsetDateTime::now_utc();
        let period_end = add_billing_cycle(now, existing.billing_period);

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                current_period_start = $2, current_period_end = $3,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $4
            "#,
        )
        .bind(existing.id)
        .bind(now)
        .bind(period_end)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::ConcurrentModification(existing.id.to_string()));
        }

        OverageService::reset_accumulation(&mut tx, existing.id).await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            period_end = %period_end,
            settled_overage = %existing.accumulated_extra_charge,
            "Subscription renewed - accumulation reset"
        );

        Ok(ProcessOutcome::SubscriptionRenewed)
    }

    /// Cancellation keeps the paid-for period: access runs until the
    /// period end that was already granted.
    async fn handle_cancellation(
        &self,
        tenant_id: Uuid,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<ProcessOutcome> {
        let existing = self.find_live(tenant_id).await?.ok_or_else(|| {
            BillingError::NotFound(format!("no live subscription for tenant {}", tenant_id))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', canceled_at = NOW(),
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(existing.id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::ConcurrentModification(existing.id.to_string()));
        }

        tracing::info!(
            tenant_id = %tenant_id,
            access_until = %existing.current_period_end,
            "Subscription canceled - access retained until period end"
        );

        let email = Arc::clone(&self.email);
        let to = event.customer_email.clone();
        tokio::spawn(async move {
            if let Err(e) = email.send_cancellation_notice(&to).await {
                tracing::error!(to = %to, error = %e, "Failed to send cancellation notice");
            }
        });

        Ok(ProcessOutcome::SubscriptionCanceled)
    }

    /// Overdue only flips the status; the provider runs its own dunning
    /// emails, so we stay quiet here.
    async fn handle_overdue(
        &self,
        tenant_id: Uuid,
        _event: &CanonicalBillingEvent,
    ) -> BillingResult<ProcessOutcome> {
        let existing = self.find_live(tenant_id).await?.ok_or_else(|| {
            BillingError::NotFound(format!("no live subscription for tenant {}", tenant_id))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due', version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(existing.id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::ConcurrentModification(existing.id.to_string()));
        }

        tracing::info!(tenant_id = %tenant_id, "Subscription past due");

        Ok(ProcessOutcome::SubscriptionPastDue)
    }

    /// Reactivation runs the purchased path for the existing account:
    /// plan, price, and limits refresh from the event, the commission
    /// classifier rules on the charge, and the confirmation email goes
    /// out.
    async fn handle_reactivation(
        &self,
        tenant_id: Uuid,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<ProcessOutcome> {
        self.handle_purchase(tenant_id, event).await?;

        tracing::info!(tenant_id = %tenant_id, "Subscription reactivated");

        Ok(ProcessOutcome::SubscriptionReactivated)
    }

    /// Move lapsed live subscriptions to expired. Run by the worker;
    /// returns how many rows moved.
    pub async fn expire_lapsed(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', version = version + 1, updated_at = NOW()
            WHERE status IN ('trial', 'active', 'past_due')
              AND current_period_end < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        let expired = result.rows_affected();
        if expired > 0 {
            tracing::info!(count = expired, "Expired lapsed subscriptions");
        }
        Ok(expired)
    }

    /// Consume an activation token: create the tenant and open the
    /// subscription the parked purchase already paid for.
    pub async fn activate_account(&self, token: &str) -> BillingResult<Subscription> {
        let parked = self.activation.consume(token).await?;

        let account = match self.accounts.find_by_email(&parked.customer_email).await? {
            Some(existing) => existing,
            None => {
                self.accounts
                    .create(&parked.customer_email, parked.customer_name.as_deref())
                    .await?
            }
        };

        let plan = self.catalog.get(parked.plan_tier);
        let now = OffsetDateTime::now_utc();
        let period_end = add_billing_cycle(now, parked.billing_period);

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions
                (tenant_id, provider, plan_tier, billing_period, status, price,
                 student_limit, extra_student_price, catalog_version,
                 needs_manual_review, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $4, 'active', $5, $6, $7, $8, false, $9, $10)
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(parked.provider)
        .bind(parked.plan_tier)
        .bind(parked.billing_period)
        .bind(parked.amount)
        .bind(plan.student_limit(parked.billing_period))
        .bind(plan.extra_student_price)
        .bind(self.catalog.version())
        .bind(now)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            tenant_id = %account.id,
            plan_tier = %parked.plan_tier,
            "Account activated from parked purchase"
        );

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn monthly_cycle_advances_one_calendar_month() {
        let start = datetime!(2025-03-10 09:00 UTC);
        let end = add_billing_cycle(start, BillingPeriod::Monthly);
        assert_eq!(end, datetime!(2025-04-10 09:00 UTC));
    }

    #[test]
    fn monthly_cycle_clamps_month_end() {
        let start = datetime!(2025-01-31 12:00 UTC);
        let end = add_billing_cycle(start, BillingPeriod::Monthly);
        assert_eq!(end, datetime!(2025-02-28 12:00 UTC));
    }

    #[test]
    fn monthly_cycle_rolls_over_december() {
        let start = datetime!(2024-12-15 00:00 UTC);
        let end = add_billing_cycle(start, BillingPeriod::Monthly);
        assert_eq!(end, datetime!(2025-01-15 00:00 UTC));
    }

    #[test]
    fn annual_cycle_clamps_leap_day() {
        let start = datetime!(2024-02-29 08:00 UTC);
        let end = add_billing_cycle(start, BillingPeriod::Annual);
        assert_eq!(end, datetime!(2025-02-28 08:00 UTC));
    }

    #[test]
    fn outcome_actions_are_stable_strings() {
        assert_eq!(ProcessOutcome::SubscriptionOpened.action(), "subscription_opened");
        assert_eq!(
            ProcessOutcome::PendingActivationCreated.action(),
            "pending_activation_created"
        );
        assert_eq!(ProcessOutcome::EventIgnored.action(), "event_ignored");
    }
}
