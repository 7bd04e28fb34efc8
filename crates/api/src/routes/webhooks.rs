//! Provider webhook endpoints
//!
//! One raw-body route per provider. The response contract is dictated by
//! provider retry behavior: failed authentication is a 401, everything
//! else is a 200 ACK with a descriptive action string. Malformed
//! payloads, duplicates, and processing errors must never bubble up as
//! 5xx, or the provider retry-storms a payload we already know we
//! cannot process.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use coachdesk_billing::{ProviderAdapter, WebhookAuth};

use crate::state::AppState;

const HOTMART_TOKEN_HEADER: &str = "x-hotmart-hottok";
const KIWIFY_SIGNATURE_HEADER: &str = "x-kiwify-signature";

#[derive(Debug, Deserialize)]
pub struct SignatureQuery {
    signature: Option<String>,
}

fn ack(success: bool, action: &str) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": success, "action": action })),
    )
        .into_response()
}

fn auth_rejected() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "action": "authentication_failed" })),
    )
        .into_response()
}

async fn handle_webhook(
    state: &AppState,
    adapter: &dyn ProviderAdapter,
    auth: &WebhookAuth,
    body: &str,
) -> Response {
    let event = match adapter.parse(body, auth) {
        Ok(event) => event,
        Err(reason) if reason.is_auth_failure() => {
            tracing::warn!(
                provider = %adapter.provider(),
                "Webhook authentication failed"
            );
            return auth_rejected();
        }
        Err(reason) => {
            tracing::warn!(
                provider = %adapter.provider(),
                reason = %reason,
                "Webhook payload rejected"
            );
            return ack(false, "payload_rejected");
        }
    };

    match state.billing.process_event(&event).await {
        Ok(disposition) => ack(true, disposition.action()),
        Err(e) => {
            tracing::error!(
                provider = %event.provider,
                external_transaction_id = %event.external_transaction_id,
                error = %e,
                "Webhook processing failed"
            );
            ack(false, "processing_error")
        }
    }
}

pub async fn hotmart_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let auth = WebhookAuth {
        token: headers
            .get(HOTMART_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        signature: None,
    };
    handle_webhook(&state, state.hotmart.as_ref(), &auth, &body).await
}

pub async fn kiwify_webhook(
    State(state): State<AppState>,
    Query(query): Query<SignatureQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    // Kiwify sends the signature as a query parameter; accept a header
    // as well for manual replay tooling.
    let signature = query.signature.or_else(|| {
        headers
            .get(KIWIFY_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    let auth = WebhookAuth {
        token: None,
        signature,
    };
    handle_webhook(&state, state.kiwify.as_ref(), &auth, &body).await
}

pub async fn cakto_webhook(State(state): State<AppState>, body: String) -> Response {
    // Cakto's secret travels inside the payload; the adapter handles it.
    let auth = WebhookAuth::default();
    handle_webhook(&state, state.cakto.as_ref(), &auth, &body).await
}
