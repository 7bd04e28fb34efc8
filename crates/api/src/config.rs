//! API server configuration

use anyhow::Context;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Hotmart integration token (sent in the X-Hotmart-Hottok header)
    pub hotmart_hottok: String,
    /// Kiwify HMAC signing secret for the raw-body signature
    pub kiwify_webhook_secret: String,
    /// Cakto shared secret embedded in the webhook payload
    pub cakto_webhook_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            hotmart_hottok: std::env::var("HOTMART_HOTTOK")
                .context("HOTMART_HOTTOK must be set")?,
            kiwify_webhook_secret: std::env::var("KIWIFY_WEBHOOK_SECRET")
                .context("KIWIFY_WEBHOOK_SECRET must be set")?,
            cakto_webhook_secret: std::env::var("CAKTO_WEBHOOK_SECRET")
                .context("CAKTO_WEBHOOK_SECRET must be set")?,
        })
    }
}
