//! CoachDesk Background Worker
//!
//! Handles scheduled jobs including:
//! - Trial expiry reminder sweep (every 15 minutes)
//! - Overage recomputation for live subscriptions (hourly)
//! - Lapsed billing period expiry (hourly)
//! - Pending activation expiry (daily at 3:00 AM UTC)

use std::sync::Arc;
use std::time::Duration;

use coachdesk_billing::{BillingError, BillingService, Subscription};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Recompute overage for every live subscription.
///
/// A version conflict means the API mutated the row mid-job; the next
/// hourly pass picks that subscription up again, so conflicts are
/// skips, not errors.
async fn recompute_all_overages(pool: &sqlx::PgPool, billing: &BillingService) {
    let subscriptions: Vec<Subscription> = match sqlx::query_as(
        r#"
        SELECT * FROM subscriptions
        WHERE status IN ('trial', 'active', 'past_due')
        "#,
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Failed to load live subscriptions for overage recompute");
            return;
        }
    };

    let total = subscriptions.len();
    let mut recorded = 0;
    let mut skipped = 0;
    let mut errors = 0;

    for subscription in &subscriptions {
        let active_students = match billing
            .accounts
            .count_active_students(subscription.tenant_id)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                error!(
                    tenant_id = %subscription.tenant_id,
                    error = %e,
                    "Failed to count active students"
                );
                errors += 1;
                continue;
            }
        };

        match billing.overage.recompute(subscription, active_students).await {
            Ok(outcome) if outcome.is_recorded() => recorded += 1,
            Ok(_) => {}
            Err(BillingError::ConcurrentModification(_)) => {
                warn!(
                    subscription_id = %subscription.id,
                    "Subscription changed during recompute, skipping until next pass"
                );
                skipped += 1;
            }
            Err(e) => {
                error!(
                    subscription_id = %subscription.id,
                    tenant_id = %subscription.tenant_id,
                    error = %e,
                    "Failed to recompute overage"
                );
                errors += 1;
            }
        }
    }

    info!(
        total = total,
        recorded = recorded,
        skipped = skipped,
        errors = errors,
        "Overage recompute cycle complete"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting CoachDesk Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Create billing service
    let billing = Arc::new(BillingService::from_env(pool.clone()));

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Trial expiry reminder sweep (every 15 minutes)
    // Short interval so the final-hours reminder lands inside its window
    let trial_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let billing = trial_billing.clone();
            Box::pin(async move {
                info!("Running trial reminder sweep");
                match billing.trial.process().await {
                    Ok(stats) => info!(
                        scanned = stats.scanned,
                        sent = stats.sent,
                        suppressed = stats.suppressed,
                        errors = stats.errors,
                        "Trial reminder sweep complete"
                    ),
                    Err(e) => error!(error = %e, "Trial reminder sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Trial reminder sweep (every 15 minutes)");

    // Job 2: Overage recompute for live subscriptions (hourly)
    let overage_pool = pool.clone();
    let overage_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let pool = overage_pool.clone();
            let billing = overage_billing.clone();
            Box::pin(async move {
                info!("Running overage recompute job");
                recompute_all_overages(&pool, &billing).await;
            })
        })?)
        .await?;
    info!("Scheduled: Overage recompute (hourly)");

    // Job 3: Expire subscriptions whose billing period has lapsed (hourly)
    let expiry_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 * * * *", move |_uuid, _l| {
            let billing = expiry_billing.clone();
            Box::pin(async move {
                info!("Running lapsed period expiry job");
                if let Err(e) = billing.subscriptions.expire_lapsed().await {
                    error!(error = %e, "Lapsed period expiry failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Lapsed period expiry (hourly at :30)");

    // Job 4: Expire stale pending activations (daily at 3:00 AM UTC)
    let activation_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let billing = activation_billing.clone();
            Box::pin(async move {
                info!("Running pending activation expiry job");
                if let Err(e) = billing.activation.expire_stale().await {
                    error!(error = %e, "Pending activation expiry failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pending activation expiry (daily at 3:00 AM UTC)");

    // Job 5: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("CoachDesk Worker started successfully with 5 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
