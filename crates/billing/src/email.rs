//! Transactional billing emails
//!
//! Thin client over an HTTP email API. Every send is fire-and-forget
//! from the caller's perspective: a failed email never rolls back a
//! billing mutation, it only logs.

use serde_json::json;

use crate::error::{BillingError, BillingResult};

pub struct BillingEmailService {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
}

impl BillingEmailService {
    /// Reads `EMAIL_API_URL` and `EMAIL_API_KEY`. When either is absent
    /// the service runs disabled and sends become logged no-ops, which
    /// keeps local development free of an email dependency.
    pub fn from_env() -> Self {
        let api_url = std::env::var("EMAIL_API_URL").ok();
        let api_key = std::env::var("EMAIL_API_KEY").ok();
        if api_url.is_none() || api_key.is_none() {
            tracing::warn!("Email service disabled - EMAIL_API_URL / EMAIL_API_KEY not set");
        }
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }

    async fn send(&self, to: &str, template: &str, data: serde_json::Value) -> BillingResult<()> {
        let (Some(url), Some(key)) = (self.api_url.as_deref(), self.api_key.as_deref()) else {
            tracing::info!(to = %to, template = %template, "Email skipped (service disabled)");
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(key)
            .json(&json!({
                "to": to,
                "template": template,
                "data": data,
            }))
            .send()
            .await
            .map_err(|e| BillingError::EmailDispatch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BillingError::EmailDispatch(format!(
                "email API returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    pub async fn send_purchase_confirmation(
        &self,
        to: &str,
        customer_name: Option<&str>,
        plan_name: &str,
    ) -> BillingResult<()> {
        self.send(
            to,
            "purchase_confirmation",
            json!({ "name": customer_name, "plan": plan_name }),
        )
        .await
    }

    pub async fn send_activation_link(&self, to: &str, token: &str) -> BillingResult<()> {
        self.send(to, "account_activation", json!({ "token": token }))
            .await
    }

    pub async fn send_cancellation_notice(&self, to: &str) -> BillingResult<()> {
        self.send(to, "subscription_canceled", json!({})).await
    }

    pub async fn send_trial_reminder(&self, to: &str, hours_remaining: i64) -> BillingResult<()> {
        self.send(
            to,
            "trial_expiring",
            json!({ "hours_remaining": hours_remaining }),
        )
        .await
    }
}
