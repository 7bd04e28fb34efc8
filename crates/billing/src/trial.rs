//! Trial expiration reminders
//!
//! A single-threaded sweep over tenants whose trial ends soon. Two
//! reminder rungs: a day-before nudge and a final-hours one. Dedup is
//! time-window based on the last send timestamp, so the 15-minute sweep
//! cadence never double-notifies, and a tenant who got the day-before
//! reminder still gets the final-hours one.

use std::sync::Arc;

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::BillingResult;

/// Which reminder rung a trial tenant is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    /// Between 2 and 24 hours remaining
    DayBefore,
    /// 2 hours or less remaining
    FinalHours,
}

impl ReminderKind {
    /// Classify by time remaining; `None` when the trial is not within
    /// the reminder horizon (already ended, or more than a day out).
    pub fn classify(remaining: Duration) -> Option<Self> {
        if remaining <= Duration::ZERO {
            return None;
        }
        if remaining <= Duration::hours(2) {
            Some(Self::FinalHours)
        } else if remaining <= Duration::hours(24) {
            Some(Self::DayBefore)
        } else {
            None
        }
    }

    /// Minimum gap since the last notification before this rung fires
    /// again. Shorter than the rung spacing so the final-hours reminder
    /// is never suppressed by the day-before one.
    fn dedup_window(&self) -> Duration {
        match self {
            Self::DayBefore => Duration::hours(20),
            Self::FinalHours => Duration::hours(4),
        }
    }

    /// Whether to send given when the tenant was last notified.
    /// Never having been notified always permits.
    pub fn should_send(&self, last_sent: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
        match last_sent {
            None => true,
            Some(at) => now - at >= self.dedup_window(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TrialTenant {
    id: Uuid,
    email: String,
    trial_ends_at: OffsetDateTime,
    last_trial_notification_sent_at: Option<OffsetDateTime>,
}

/// Sweep results, surfaced in worker logs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub errors: usize,
}

pub struct TrialNotifier {
    pool: PgPool,
    email: Arc<BillingEmailService>,
}

impl TrialNotifier {
    pub fn new(pool: PgPool, email: Arc<BillingEmailService>) -> Self {
        Self { pool, email }
    }

    /// Trial tenants whose trial ends within the next `hours_ahead`
    /// hours. Already-ended trials are excluded; the expiry sweep
    /// handles those.
    async fn scan(&self, hours_ahead: i32) -> BillingResult<Vec<TrialTenant>> {
        let tenants = sqlx::query_as::<_, TrialTenant>(
            r#"
            SELECT t.id, t.email, t.trial_ends_at, t.last_trial_notification_sent_at
            FROM tenants t
            JOIN subscriptions s ON s.tenant_id = t.id AND s.status = 'trial'
            WHERE t.trial_ends_at > NOW()
              AND t.trial_ends_at <= NOW() + make_interval(hours => $1)
            "#,
        )
        .bind(hours_ahead)
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }

    /// One full reminder pass. Send failures are counted, not retried
    /// within the pass; the next sweep picks them up because the last
    /// send timestamp only advances on success.
    pub async fn process(&self) -> BillingResult<SweepStats> {
        let now = OffsetDateTime::now_utc();
        let tenants = self.scan(24).await?;

        let mut stats = SweepStats {
            scanned: tenants.len(),
            ..SweepStats::default()
        };

        for tenant in tenants {
            let remaining = tenant.trial_ends_at - now;
            let Some(kind) = ReminderKind::classify(remaining) else {
                continue;
            };

            if !kind.should_send(tenant.last_trial_notification_sent_at, now) {
                stats.suppressed += 1;
                continue;
            }

            let hours_remaining = remaining.whole_hours().max(1);
            match self.email.send_trial_reminder(&tenant.email, hours_remaining).await {
                Ok(()) => {
                    self.mark_notified(tenant.id).await?;
                    stats.sent += 1;
                    tracing::info!(
                        tenant_id = %tenant.id,
                        hours_remaining = hours_remaining,
                        "Trial reminder sent"
                    );
                }
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(
                        tenant_id = %tenant.id,
                        error = %e,
                        "Trial reminder failed"
                    );
                }
            }
        }

        Ok(stats)
    }

    async fn mark_notified(&self, tenant_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET last_trial_notification_sent_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
