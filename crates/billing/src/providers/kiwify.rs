//! Kiwify webhook adapter
//!
//! Kiwify signs the raw request body with HMAC-SHA256 and sends the hex
//! digest as a `signature` query parameter. Amounts arrive in cents, and
//! the subscription object carries an explicit charge counter. The
//! commission breakdown lists one entry per receiving party.

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::catalog::PlanCatalog;
use crate::error::RejectionReason;
use crate::events::{
    BillingEventKind, CanonicalBillingEvent, CommissionEntry, EventSubscription, Provider,
};

use super::{cents_to_decimal, verify_body_signature, ProviderAdapter, WebhookAuth};

#[derive(Debug, Deserialize)]
struct KiwifyWebhook {
    order_id: String,
    #[serde(default)]
    order_ref: Option<String>,
    order_status: String,
    #[serde(default)]
    webhook_event_type: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(rename = "Product")]
    product: KiwifyProduct,
    #[serde(rename = "Customer")]
    customer: KiwifyCustomer,
    #[serde(rename = "Commissions", default)]
    commissions: Option<KiwifyCommissions>,
    #[serde(rename = "Subscription", default)]
    subscription: Option<KiwifySubscription>,
}

#[derive(Debug, Deserialize)]
struct KiwifyProduct {
    #[serde(default)]
    product_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KiwifyCustomer {
    email: String,
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KiwifyCommissions {
    /// Total charged, in cents
    charge_amount: i64,
    #[serde(default)]
    commissioned_stores: Vec<KiwifyCommissionedStore>,
}

#[derive(Debug, Deserialize)]
struct KiwifyCommissionedStore {
    /// Party label ("affiliate", "producer", ...)
    #[serde(default)]
    custom_name: Option<String>,
    /// Amount in cents
    value: i64,
}

#[derive(Debug, Deserialize)]
struct KiwifySubscription {
    #[serde(default)]
    id: Option<String>,
    /// Charge counter; 1 on the first completed charge
    #[serde(default)]
    charges: Option<i32>,
}

/// Adapter for Kiwify order/subscription webhooks
pub struct KiwifyAdapter {
    webhook_secret: String,
    catalog: PlanCatalog,
}

impl KiwifyAdapter {
    pub fn new(webhook_secret: impl Into<String>, catalog: PlanCatalog) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            catalog,
        }
    }

    fn normalize_kind(
        order_status: &str,
        event_type: Option<&str>,
        charge_count: Option<i32>,
    ) -> BillingEventKind {
        // Dedicated subscription events take precedence over order status
        match event_type {
            Some("subscription_renewed") => return BillingEventKind::Renewed,
            Some("subscription_late") => return BillingEventKind::Overdue,
            Some("subscription_canceled") => return BillingEventKind::Canceled,
            _ => {}
        }

        match order_status {
            "paid" => match charge_count {
                Some(n) if n > 1 => BillingEventKind::Renewed,
                _ => BillingEventKind::Purchased,
            },
            "refunded" | "chargedback" => BillingEventKind::Canceled,
            // waiting_payment, refused, and pix/boleto lifecycle noise
            _ => BillingEventKind::Ignored,
        }
    }
}

impl ProviderAdapter for KiwifyAdapter {
    fn provider(&self) -> Provider {
        Provider::Kiwify
    }

    fn parse(
        &self,
        raw_body: &str,
        auth: &WebhookAuth,
    ) -> Result<CanonicalBillingEvent, RejectionReason> {
        let signature = auth
            .signature
            .as_deref()
            .ok_or(RejectionReason::AuthenticationFailed)?;
        if !verify_body_signature(&self.webhook_secret, raw_body, signature) {
            return Err(RejectionReason::AuthenticationFailed);
        }

        let payload: KiwifyWebhook = serde_json::from_str(raw_body)
            .map_err(|e| RejectionReason::Malformed(e.to_string()))?;

        let charge_count = payload.subscription.as_ref().and_then(|s| s.charges);
        let kind = Self::normalize_kind(
            &payload.order_status,
            payload.webhook_event_type.as_deref(),
            charge_count,
        );

        let plan_code = payload.product.product_name.clone().unwrap_or_default();
        let resolved = self.catalog.resolve_product_code(&plan_code);

        let amount = payload
            .commissions
            .as_ref()
            .map(|c| cents_to_decimal(c.charge_amount))
            .unwrap_or_default();

        let commissions = payload
            .commissions
            .as_ref()
            .map(|c| {
                c.commissioned_stores
                    .iter()
                    .map(|s| CommissionEntry {
                        party: s
                            .custom_name
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string())
                            .to_lowercase(),
                        amount: cents_to_decimal(s.value),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let subscription = payload.subscription.as_ref().map(|s| EventSubscription {
            external_subscription_id: s.id.clone(),
            charge_count: s.charges,
        });

        let occurred_at = payload
            .created_at
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        Ok(CanonicalBillingEvent {
            provider: Provider::Kiwify,
            external_transaction_id: payload.order_id,
            external_order_id: payload.order_ref,
            kind,
            customer_email: payload.customer.email.to_lowercase(),
            customer_name: payload.customer.full_name,
            plan_tier: resolved.tier,
            billing_period: resolved.period,
            plan_resolution: resolved.resolution,
            amount,
            subscription,
            commissions,
            occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachdesk_shared::{BillingPeriod, PlanTier};
    use hmac::Mac;
    use rust_decimal::Decimal;

    const SECRET: &str = "kiwify-whk-secret";

    fn adapter() -> KiwifyAdapter {
        KiwifyAdapter::new(SECRET, PlanCatalog::builtin())
    }

    fn sign(body: &str) -> WebhookAuth {
        let mut mac =
            hmac::Hmac::<sha2::Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        WebhookAuth {
            token: None,
            signature: Some(hex::encode(mac.finalize().into_bytes())),
        }
    }

    fn paid_payload(charges: i32) -> String {
        format!(
            r#"{{
                "order_id": "kw-ord-42",
                "order_ref": "REF-42",
                "order_status": "paid",
                "webhook_event_type": "order_approved",
                "created_at": "2025-01-15T12:00:00Z",
                "Product": {{"product_name": "CD_STARTER_MENSAL"}},
                "Customer": {{"email": "coach@academia.com", "full_name": "Bruno Lima"}},
                "Commissions": {{
                    "charge_amount": 9700,
                    "commissioned_stores": [
                        {{"custom_name": "affiliate", "value": 4365}}
                    ]
                }},
                "Subscription": {{"id": "kw-sub-9", "charges": {charges}}}
            }}"#
        )
    }

    #[test]
    fn valid_signature_parses_first_charge() {
        let body = paid_payload(1);
        let event = adapter().parse(&body, &sign(&body)).unwrap();

        assert_eq!(event.kind, BillingEventKind::Purchased);
        assert_eq!(event.external_transaction_id, "kw-ord-42");
        assert_eq!(event.plan_tier, PlanTier::Starter);
        assert_eq!(event.billing_period, BillingPeriod::Monthly);
        assert_eq!(event.amount, Decimal::new(9700, 2));
        assert_eq!(event.charge_count(), Some(1));
        assert_eq!(event.commissions[0].party, "affiliate");
        assert_eq!(event.commissions[0].amount, Decimal::new(4365, 2));
    }

    #[test]
    fn second_charge_is_renewal() {
        let body = paid_payload(2);
        let event = adapter().parse(&body, &sign(&body)).unwrap();
        assert_eq!(event.kind, BillingEventKind::Renewed);
    }

    #[test]
    fn tampered_body_fails_authentication() {
        let body = paid_payload(1);
        let auth = sign(&body);
        let tampered = body.replace("9700", "1");
        let err = adapter().parse(&tampered, &auth).unwrap_err();
        assert_eq!(err, RejectionReason::AuthenticationFailed);
    }

    #[test]
    fn missing_signature_fails_authentication() {
        let body = paid_payload(1);
        let err = adapter().parse(&body, &WebhookAuth::default()).unwrap_err();
        assert_eq!(err, RejectionReason::AuthenticationFailed);
    }

    #[test]
    fn subscription_events_override_order_status() {
        assert_eq!(
            KiwifyAdapter::normalize_kind("paid", Some("subscription_late"), Some(3)),
            BillingEventKind::Overdue
        );
        assert_eq!(
            KiwifyAdapter::normalize_kind("paid", Some("subscription_canceled"), Some(3)),
            BillingEventKind::Canceled
        );
        assert_eq!(
            KiwifyAdapter::normalize_kind("refunded", None, Some(1)),
            BillingEventKind::Canceled
        );
        assert_eq!(
            KiwifyAdapter::normalize_kind("waiting_payment", None, None),
            BillingEventKind::Ignored
        );
    }
}
