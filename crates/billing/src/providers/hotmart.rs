//! Hotmart webhook adapter
//!
//! Hotmart authenticates webhooks with a static integration token sent in
//! the `X-Hotmart-Hottok` header; there is no body signature. First
//! charges and renewals both arrive as `PURCHASE_APPROVED`, distinguished
//! by the purchase recurrence counter.

use serde::Deserialize;
use time::OffsetDateTime;

use crate::catalog::PlanCatalog;
use crate::error::RejectionReason;
use crate::events::{
    BillingEventKind, CanonicalBillingEvent, CommissionEntry, EventSubscription, Provider,
};

use super::{float_to_decimal, secrets_match, ProviderAdapter, WebhookAuth};

#[derive(Debug, Deserialize)]
struct HotmartWebhook {
    id: String,
    event: String,
    /// Unix timestamp in milliseconds
    creation_date: Option<i64>,
    data: HotmartData,
}

#[derive(Debug, Deserialize)]
struct HotmartData {
    purchase: HotmartPurchase,
    buyer: HotmartBuyer,
    #[serde(default)]
    subscription: Option<HotmartSubscription>,
    #[serde(default)]
    product: Option<HotmartProduct>,
    #[serde(default)]
    commissions: Vec<HotmartCommission>,
}

#[derive(Debug, Deserialize)]
struct HotmartPurchase {
    transaction: String,
    #[serde(default)]
    order_ref: Option<String>,
    price: HotmartPrice,
    /// 1 on the first charge, incremented on each renewal
    #[serde(default)]
    recurrence_number: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct HotmartPrice {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct HotmartBuyer {
    email: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HotmartSubscription {
    #[serde(default)]
    subscriber: Option<HotmartSubscriber>,
    #[serde(default)]
    plan: Option<HotmartPlan>,
}

#[derive(Debug, Deserialize)]
struct HotmartSubscriber {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HotmartPlan {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HotmartProduct {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HotmartCommission {
    value: f64,
    /// "AFFILIATE", "PRODUCER", "MARKETPLACE", ...
    source: Option<String>,
}

/// Adapter for Hotmart purchase/subscription webhooks
pub struct HotmartAdapter {
    hottok: String,
    catalog: PlanCatalog,
}

impl HotmartAdapter {
    pub fn new(hottok: impl Into<String>, catalog: PlanCatalog) -> Self {
        Self {
            hottok: hottok.into(),
            catalog,
        }
    }

    fn normalize_kind(event: &str, recurrence: Option<i32>) -> BillingEventKind {
        match event {
            "PURCHASE_APPROVED" | "PURCHASE_COMPLETE" => match recurrence {
                Some(n) if n > 1 => BillingEventKind::Renewed,
                _ => BillingEventKind::Purchased,
            },
            "PURCHASE_DELAYED" => BillingEventKind::Overdue,
            "PURCHASE_CANCELED"
            | "PURCHASE_REFUNDED"
            | "PURCHASE_CHARGEBACK"
            | "PURCHASE_PROTEST"
            | "SUBSCRIPTION_CANCELLATION" => BillingEventKind::Canceled,
            // Billet printed, cart abandonment, plan switches: no billing meaning here
            _ => BillingEventKind::Ignored,
        }
    }
}

impl ProviderAdapter for HotmartAdapter {
    fn provider(&self) -> Provider {
        Provider::Hotmart
    }

    fn parse(
        &self,
        raw_body: &str,
        auth: &WebhookAuth,
    ) -> Result<CanonicalBillingEvent, RejectionReason> {
        let provided = auth
            .token
            .as_deref()
            .ok_or(RejectionReason::AuthenticationFailed)?;
        if !secrets_match(&self.hottok, provided) {
            return Err(RejectionReason::AuthenticationFailed);
        }

        let payload: HotmartWebhook = serde_json::from_str(raw_body)
            .map_err(|e| RejectionReason::Malformed(e.to_string()))?;

        let recurrence = payload.data.purchase.recurrence_number;
        let kind = Self::normalize_kind(&payload.event, recurrence);

        // Plan code: subscription plan name when present, product name otherwise
        let plan_code = payload
            .data
            .subscription
            .as_ref()
            .and_then(|s| s.plan.as_ref())
            .and_then(|p| p.name.clone())
            .or_else(|| payload.data.product.as_ref().and_then(|p| p.name.clone()))
            .unwrap_or_default();
        let resolved = self.catalog.resolve_product_code(&plan_code);

        let amount = float_to_decimal(payload.data.purchase.price.value)?;

        let commissions = payload
            .data
            .commissions
            .iter()
            .map(|c| {
                Ok(CommissionEntry {
                    party: c
                        .source
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string())
                        .to_lowercase(),
                    amount: float_to_decimal(c.value)?,
                })
            })
            .collect::<Result<Vec<_>, RejectionReason>>()?;

        let subscription = payload.data.subscription.as_ref().map(|s| EventSubscription {
            external_subscription_id: s.subscriber.as_ref().and_then(|sub| sub.code.clone()),
            charge_count: recurrence,
        });

        let occurred_at = payload
            .creation_date
            .and_then(|ms| OffsetDateTime::from_unix_timestamp(ms / 1000).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        Ok(CanonicalBillingEvent {
            provider: Provider::Hotmart,
            external_transaction_id: payload.data.purchase.transaction,
            external_order_id: payload.data.purchase.order_ref.or(Some(payload.id)),
            kind,
            customer_email: payload.data.buyer.email.to_lowercase(),
            customer_name: payload.data.buyer.name,
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
    use rust_decimal::Decimal;

    fn adapter() -> HotmartAdapter {
        HotmartAdapter::new("hottok-test", PlanCatalog::builtin())
    }

    fn approved_payload(recurrence: i32) -> String {
        format!(
            r#"{{
                "id": "evt-1",
                "event": "PURCHASE_APPROVED",
                "creation_date": 1736899200000,
                "data": {{
                    "purchase": {{
                        "transaction": "HP09876543210",
                        "order_ref": "ORD-555",
                        "price": {{"value": 147.0}},
                        "recurrence_number": {recurrence}
                    }},
                    "buyer": {{"email": "Trainer@Example.com", "name": "Ana Souza"}},
                    "subscription": {{
                        "subscriber": {{"code": "SUB-88"}},
                        "plan": {{"name": "CD_PRO_MENSAL"}}
                    }},
                    "commissions": [
                        {{"value": 66.15, "source": "AFFILIATE"}},
                        {{"value": 80.85, "source": "PRODUCER"}}
                    ]
                }}
            }}"#
        )
    }

    #[test]
    fn missing_hottok_is_auth_failure() {
        let err = adapter()
            .parse(&approved_payload(1), &WebhookAuth::default())
            .unwrap_err();
        assert_eq!(err, RejectionReason::AuthenticationFailed);
    }

    #[test]
    fn wrong_hottok_is_auth_failure() {
        let auth = WebhookAuth {
            token: Some("wrong".to_string()),
            signature: None,
        };
        let err = adapter().parse(&approved_payload(1), &auth).unwrap_err();
        assert_eq!(err, RejectionReason::AuthenticationFailed);
    }

    #[test]
    fn first_approval_is_purchase() {
        let auth = WebhookAuth {
            token: Some("hottok-test".to_string()),
            signature: None,
        };
        let event = adapter().parse(&approved_payload(1), &auth).unwrap();

        assert_eq!(event.kind, BillingEventKind::Purchased);
        assert_eq!(event.provider, Provider::Hotmart);
        assert_eq!(event.external_transaction_id, "HP09876543210");
        assert_eq!(event.customer_email, "trainer@example.com");
        assert_eq!(event.plan_tier, PlanTier::Pro);
        assert_eq!(event.billing_period, BillingPeriod::Monthly);
        assert_eq!(event.amount, Decimal::new(14700, 2));
        assert_eq!(event.charge_count(), Some(1));
        assert_eq!(event.commissions.len(), 2);
        assert_eq!(event.commissions[0].party, "affiliate");
        assert_eq!(event.commissions[0].amount, Decimal::new(6615, 2));
    }

    #[test]
    fn later_recurrence_is_renewal() {
        let auth = WebhookAuth {
            token: Some("hottok-test".to_string()),
            signature: None,
        };
        let event = adapter().parse(&approved_payload(4), &auth).unwrap();
        assert_eq!(event.kind, BillingEventKind::Renewed);
        assert_eq!(event.charge_count(), Some(4));
    }

    #[test]
    fn vocabulary_normalization() {
        assert_eq!(
            HotmartAdapter::normalize_kind("PURCHASE_DELAYED", Some(2)),
            BillingEventKind::Overdue
        );
        assert_eq!(
            HotmartAdapter::normalize_kind("PURCHASE_CHARGEBACK", Some(1)),
            BillingEventKind::Canceled
        );
        assert_eq!(
            HotmartAdapter::normalize_kind("SUBSCRIPTION_CANCELLATION", None),
            BillingEventKind::Canceled
        );
        assert_eq!(
            HotmartAdapter::normalize_kind("PURCHASE_BILLET_PRINTED", None),
            BillingEventKind::Ignored
        );
    }

    #[test]
    fn malformed_body_is_rejected_not_auth() {
        let auth = WebhookAuth {
            token: Some("hottok-test".to_string()),
            signature: None,
        };
        let err = adapter().parse("{not json", &auth).unwrap_err();
        assert!(matches!(err, RejectionReason::Malformed(_)));
    }
}
