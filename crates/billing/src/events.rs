//! Canonical billing events
//!
//! The provider-agnostic representation of "a customer paid / renewed /
//! canceled / fell overdue". Adapters are the only place provider
//! vocabulary leaks in; everything downstream of this type is
//! provider-neutral.

use coachdesk_shared::{BillingPeriod, PlanTier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::catalog::CodeResolution;

/// Payment provider identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Hotmart,
    Kiwify,
    Cakto,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hotmart => "hotmart",
            Self::Kiwify => "kiwify",
            Self::Cakto => "cakto",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of normalized event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventKind {
    /// First successful charge of a subscription lifecycle
    Purchased,
    /// Recurring charge of an existing subscription
    Renewed,
    /// Cancellation, refund, or chargeback
    Canceled,
    /// Payment attempt failed / charge is late
    Overdue,
    /// A past-due or canceled subscription came back
    Reactivated,
    /// Test events and statuses with no billing meaning
    Ignored,
}

impl BillingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchased => "purchased",
            Self::Renewed => "renewed",
            Self::Canceled => "canceled",
            Self::Overdue => "overdue",
            Self::Reactivated => "reactivated",
            Self::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for BillingEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single entry from a provider's per-party commission breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionEntry {
    /// Provider's label for the receiving party ("affiliate", "producer", ...)
    pub party: String,
    pub amount: Decimal,
}

/// Subscription details carried by an event, when the provider sent any.
///
/// A one-time purchase has no subscription object at all; that absence is
/// meaningful to the commission classifier (always a first charge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub external_subscription_id: Option<String>,
    /// Provider-side charge counter; 1 on the first charge
    pub charge_count: Option<i32>,
}

/// Normalized billing event produced by a provider adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalBillingEvent {
    pub provider: Provider,
    /// Provider-unique transaction identifier; the dedup ledger key
    pub external_transaction_id: String,
    pub external_order_id: Option<String>,
    pub kind: BillingEventKind,
    pub customer_email: String,
    pub customer_name: Option<String>,
    /// Resolved from the provider product/offer code
    pub plan_tier: PlanTier,
    pub billing_period: BillingPeriod,
    /// How the plan code was resolved; `Fallback` rows get flagged
    pub plan_resolution: CodeResolution,
    /// Total charge amount
    pub amount: Decimal,
    pub subscription: Option<EventSubscription>,
    /// Per-party commission breakdown, when the payload listed one
    pub commissions: Vec<CommissionEntry>,
    pub occurred_at: OffsetDateTime,
}

impl CanonicalBillingEvent {
    /// Charge counter, when the provider sent a subscription object
    pub fn charge_count(&self) -> Option<i32> {
        self.subscription.as_ref().and_then(|s| s.charge_count)
    }
}
