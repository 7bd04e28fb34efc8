//! HTTP route definitions

pub mod admin;
pub mod billing;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Build the full application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/hotmart", post(webhooks::hotmart_webhook))
        .route("/webhooks/kiwify", post(webhooks::kiwify_webhook))
        .route("/webhooks/cakto", post(webhooks::cakto_webhook))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/upgrade/preview", post(billing::preview_upgrade))
        .route("/billing/overage", get(billing::get_overage))
        .route("/activate", post(billing::activate))
        .route("/admin/invariants", get(admin::run_invariants))
        .route("/admin/invariants/{name}", get(admin::run_invariant))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
