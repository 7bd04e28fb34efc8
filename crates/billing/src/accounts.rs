//! Tenant account lookups
//!
//! The billing core needs three things from the tenant side: find an
//! account by the buyer's email, create one when an activation token is
//! consumed, and count the active students a tenant currently manages.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantAccount {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct AccountService {
    pool: PgPool,
}

impl AccountService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Emails are stored lowercased; lookups normalize the same way so
    /// provider payloads with mixed-case emails still match.
    pub async fn find_by_email(&self, email: &str) -> BillingResult<Option<TenantAccount>> {
        let account = sqlx::query_as(
            r#"
            SELECT id, email, name, trial_ends_at, created_at
            FROM tenants
            WHERE email = $1
            "#,
        )
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn create(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> BillingResult<TenantAccount> {
        let account = sqlx::query_as(
            r#"
            INSERT INTO tenants (email, name)
            VALUES ($1, $2)
            RETURNING id, email, name, trial_ends_at, created_at
            "#,
        )
        .bind(email.to_lowercase())
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    /// Active students only; archived and invited-but-unconfirmed rows
    /// do not count against the plan limit.
    pub async fn count_active_students(&self, tenant_id: Uuid) -> BillingResult<i32> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM students
            WHERE tenant_id = $1 AND status = 'active'
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as i32)
    }
}
