//! Idempotency ledger for processed provider events
//!
//! Webhook delivery is at-least-once and unordered, so the same external
//! transaction can arrive multiple times, interleaved with unrelated
//! events. The ledger's unique constraint on
//! `(provider, external_transaction_id)` is the system's core
//! correctness guarantee: the claim INSERT and the existence check are a
//! single atomic statement, so two concurrent deliveries of the same
//! transaction can never both win.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::Provider;

/// Outcome of a claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller holds exclusive processing rights for the event
    Claimed,
    /// Another delivery already claimed this transaction; drop it
    Duplicate,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// Dedup ledger backed by the `processed_events` table
#[derive(Clone)]
pub struct DedupLedger {
    pool: PgPool,
}

impl DedupLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically claim an external transaction for processing.
    ///
    /// INSERT .. ON CONFLICT DO NOTHING RETURNING: a returned row means
    /// exclusive claim; no row means another process already holds it.
    pub async fn try_claim(
        &self,
        provider: Provider,
        external_transaction_id: &str,
        event_kind: &str,
    ) -> BillingResult<ClaimOutcome> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO processed_events (provider, external_transaction_id, event_kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider, external_transaction_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(provider)
        .bind(external_transaction_id)
        .bind(event_kind)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            Ok(ClaimOutcome::Claimed)
        } else {
            tracing::info!(
                provider = %provider,
                external_transaction_id = %external_transaction_id,
                "Duplicate webhook event - dropped by dedup ledger"
            );
            Ok(ClaimOutcome::Duplicate)
        }
    }

    /// Record the processing result on an already-claimed event, for audit.
    /// Failures here are logged by the caller and never fail the webhook.
    pub async fn record_result(
        &self,
        provider: Provider,
        external_transaction_id: &str,
        result: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE processed_events
            SET processing_result = $3, error_message = $4, processed_at = NOW()
            WHERE provider = $1 AND external_transaction_id = $2
            "#,
        )
        .bind(provider)
        .bind(external_transaction_id)
        .bind(result)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_claim_grants_processing_rights() {
        assert!(ClaimOutcome::Claimed.is_claimed());
        assert!(!ClaimOutcome::Duplicate.is_claimed());
    }
}
