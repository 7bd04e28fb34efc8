//! Cakto webhook adapter
//!
//! Cakto embeds the integration secret inside the JSON payload rather
//! than a header, so the body must be parsed before the auth decision.
//! Unlike the other providers it emits an explicit reactivation event.

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::catalog::PlanCatalog;
use crate::error::RejectionReason;
use crate::events::{
    BillingEventKind, CanonicalBillingEvent, EventSubscription, Provider,
};

use super::{float_to_decimal, secrets_match, ProviderAdapter, WebhookAuth};

#[derive(Debug, Deserialize)]
struct CaktoWebhook {
    secret: Option<String>,
    event: String,
    data: CaktoData,
}

#[derive(Debug, Deserialize)]
struct CaktoData {
    id: String,
    #[serde(rename = "refId", default)]
    ref_id: Option<String>,
    amount: f64,
    offer: CaktoOffer,
    customer: CaktoCustomer,
    #[serde(default)]
    subscription: Option<CaktoSubscription>,
    #[serde(rename = "createdAt", default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaktoOffer {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaktoCustomer {
    email: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaktoSubscription {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "chargeNumber", default)]
    charge_number: Option<i32>,
}

/// Adapter for Cakto checkout/subscription webhooks
pub struct CaktoAdapter {
    secret: String,
    catalog: PlanCatalog,
}

impl CaktoAdapter {
    pub fn new(secret: impl Into<String>, catalog: PlanCatalog) -> Self {
        Self {
            secret: secret.into(),
            catalog,
        }
    }

    fn normalize_kind(event: &str, charge_number: Option<i32>) -> BillingEventKind {
        match event {
            "purchase_approved" => match charge_number {
                Some(n) if n > 1 => BillingEventKind::Renewed,
                _ => BillingEventKind::Purchased,
            },
            "subscription_renewed" => BillingEventKind::Renewed,
            "subscription_canceled" | "refund" | "chargeback" => BillingEventKind::Canceled,
            "subscription_delayed" | "payment_overdue" => BillingEventKind::Overdue,
            "subscription_reactivated" => BillingEventKind::Reactivated,
            // test pings and pix/boleto lifecycle events
            _ => BillingEventKind::Ignored,
        }
    }
}

impl ProviderAdapter for CaktoAdapter {
    fn provider(&self) -> Provider {
        Provider::Cakto
    }

    fn parse(
        &self,
        raw_body: &str,
        _auth: &WebhookAuth,
    ) -> Result<CanonicalBillingEvent, RejectionReason> {
        // The secret travels in the payload; parse errors before the auth
        // check must not be reported as auth failures, so peel the secret
        // off first with a tolerant pass.
        let payload: CaktoWebhook = serde_json::from_str(raw_body)
            .map_err(|e| RejectionReason::Malformed(e.to_string()))?;

        let provided = payload
            .secret
            .as_deref()
            .ok_or(RejectionReason::AuthenticationFailed)?;
        if !secrets_match(&self.secret, provided) {
            return Err(RejectionReason::AuthenticationFailed);
        }

        let charge_number = payload
            .data
            .subscription
            .as_ref()
            .and_then(|s| s.charge_number);
        let kind = Self::normalize_kind(&payload.event, charge_number);

        let plan_code = payload.data.offer.name.clone().unwrap_or_default();
        let resolved = self.catalog.resolve_product_code(&plan_code);

        let amount = float_to_decimal(payload.data.amount)?;

        let subscription = payload.data.subscription.as_ref().map(|s| EventSubscription {
            external_subscription_id: s.id.clone(),
            charge_count: s.charge_number,
        });

        let occurred_at = payload
            .data
            .created_at
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        Ok(CanonicalBillingEvent {
            provider: Provider::Cakto,
            external_transaction_id: payload.data.id,
            external_order_id: payload.data.ref_id,
            kind,
            customer_email: payload.data.customer.email.to_lowercase(),
            customer_name: payload.data.customer.name,
            plan_tier: resolved.tier,
            billing_period: resolved.period,
            plan_resolution: resolved.resolution,
            amount,
            subscription,
            // Cakto does not send a commission breakdown; the classifier
            // falls back to the configured percentage.
            commissions: Vec::new(),
            occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachdesk_shared::{BillingPeriod, PlanTier};
    use rust_decimal::Decimal;

    fn adapter() -> CaktoAdapter {
        CaktoAdapter::new("cakto-secret", PlanCatalog::builtin())
    }

    fn payload(event: &str, secret: &str, charge_number: i32) -> String {
        format!(
            r#"{{
                "secret": "{secret}",
                "event": "{event}",
                "data": {{
                    "id": "ck-tx-7",
                    "refId": "CK-REF-7",
                    "amount": 247.0,
                    "offer": {{"name": "CD_ELITE_ANUAL"}},
                    "customer": {{"email": "elite@coach.com", "name": "Carla Reis"}},
                    "subscription": {{"id": "ck-sub-3", "chargeNumber": {charge_number}}},
                    "createdAt": "2025-02-01T08:30:00Z"
                }}
            }}"#
        )
    }

    #[test]
    fn wrong_secret_is_auth_failure() {
        let body = payload("purchase_approved", "nope", 1);
        let err = adapter().parse(&body, &WebhookAuth::default()).unwrap_err();
        assert_eq!(err, RejectionReason::AuthenticationFailed);
    }

    #[test]
    fn approved_purchase_normalizes() {
        let body = payload("purchase_approved", "cakto-secret", 1);
        let event = adapter().parse(&body, &WebhookAuth::default()).unwrap();

        assert_eq!(event.kind, BillingEventKind::Purchased);
        assert_eq!(event.plan_tier, PlanTier::Elite);
        assert_eq!(event.billing_period, BillingPeriod::Annual);
        assert_eq!(event.amount, Decimal::new(24700, 2));
        assert!(event.commissions.is_empty());
    }

    #[test]
    fn reactivation_maps_to_reactivated() {
        let body = payload("subscription_reactivated", "cakto-secret", 5);
        let event = adapter().parse(&body, &WebhookAuth::default()).unwrap();
        assert_eq!(event.kind, BillingEventKind::Reactivated);
    }

    #[test]
    fn overdue_and_test_events() {
        assert_eq!(
            CaktoAdapter::normalize_kind("subscription_delayed", Some(2)),
            BillingEventKind::Overdue
        );
        assert_eq!(
            CaktoAdapter::normalize_kind("test_webhook", None),
            BillingEventKind::Ignored
        );
        assert_eq!(
            CaktoAdapter::normalize_kind("chargeback", Some(1)),
            BillingEventKind::Canceled
        );
    }

    #[test]
    fn malformed_body_is_not_auth_failure() {
        let err = adapter().parse("[]", &WebhookAuth::default()).unwrap_err();
        assert!(matches!(err, RejectionReason::Malformed(_)));
    }
}
