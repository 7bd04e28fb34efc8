//! Pending account activation
//!
//! A paid purchase can arrive before the buyer has an account. Instead
//! of dropping the payment, we park it as a pending activation keyed by
//! a single-use token and email the buyer an activation link. Consuming
//! the token creates the tenant and opens the subscription that the
//! purchase already paid for.

use rand::RngCore;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use coachdesk_shared::{BillingPeriod, PlanTier};

use crate::error::{BillingError, BillingResult};

const TOKEN_BYTES: usize = 32;
const TOKEN_TTL_DAYS: i64 = 7;

/// A parked purchase awaiting account creation
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingActivation {
    pub id: Uuid,
    pub token: String,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub plan_tier: PlanTier,
    pub billing_period: BillingPeriod,
    pub amount: rust_decimal::Decimal,
    pub provider: crate::events::Provider,
    pub external_transaction_id: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

pub struct ActivationService {
    pool: PgPool,
}

impl ActivationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Park a paid purchase for a buyer with no account yet.
    ///
    /// Returns the token to embed in the activation link. The token
    /// expires after seven days; expired rows are swept by the worker.
    pub async fn create(
        &self,
        customer_email: &str,
        customer_name: Option<&str>,
        plan_tier: PlanTier,
        billing_period: BillingPeriod,
        amount: rust_decimal::Decimal,
        provider: crate::events::Provider,
        external_transaction_id: &str,
    ) -> BillingResult<String> {
        let token = Self::generate_token();
        let expires_at = OffsetDateTime::now_utc() + Duration::days(TOKEN_TTL_DAYS);

        sqlx::query(
            r#"
            INSERT INTO pending_activations
                (token, customer_email, customer_name, plan_tier, billing_period,
                 amount, provider, external_transaction_id, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
            "#,
        )
        .bind(&token)
        .bind(customer_email)
        .bind(customer_name)
        .bind(plan_tier)
        .bind(billing_period)
        .bind(amount)
        .bind(provider)
        .bind(external_transaction_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            customer_email = %customer_email,
            plan_tier = %plan_tier,
            provider = %provider,
            "Pending activation created"
        );

        Ok(token)
    }

    /// Atomically consume a token: a single UPDATE claims it only while
    /// it is still pending and unexpired, so concurrent consumers cannot
    /// both succeed and an activated token can never go back to pending.
    pub async fn consume(&self, token: &str) -> BillingResult<PendingActivation> {
        let activation: Option<PendingActivation> = sqlx::query_as(
            r#"
            UPDATE pending_activations
            SET status = 'activated', activated_at = NOW()
            WHERE token = $1 AND status = 'pending' AND expires_at > NOW()
            RETURNING id, token, customer_email, customer_name, plan_tier,
                      billing_period, amount, provider, external_transaction_id,
                      expires_at, created_at
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        activation.ok_or(BillingError::ActivationTokenInvalid)
    }

    /// Mark expired pending rows so they stop being consumable and the
    /// support team can see them. Returns how many were swept.
    pub async fn expire_stale(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE pending_activations
            SET status = 'expired'
            WHERE status = 'pending' AND expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            tracing::info!(count = swept, "Expired stale pending activations");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_unique() {
        let a = ActivationService::generate_token();
        let b = ActivationService::generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
