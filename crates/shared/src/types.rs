//! Common types used across CoachDesk

use serde::{Deserialize, Serialize};

/// Plan tier for billing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Starter,
    Pro,
    Elite,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Starter
    }
}

impl PlanTier {
    /// Fixed ordering used for upgrade/downgrade comparisons and
    /// "next tier up" recommendations
    pub fn order(&self) -> u8 {
        match self {
            Self::Starter => 0,
            Self::Pro => 1,
            Self::Elite => 2,
        }
    }

    /// The tier strictly above this one, if any
    pub fn next_up(&self) -> Option<Self> {
        match self {
            Self::Starter => Some(Self::Pro),
            Self::Pro => Some(Self::Elite),
            Self::Elite => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Elite => "elite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "starter" => Some(Self::Starter),
            "pro" => Some(Self::Pro),
            "elite" => Some(Self::Elite),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing cycle length for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" => Some(Self::Monthly),
            "annual" | "yearly" => Some(Self::Annual),
            _ => None,
        }
    }

    /// Nominal period length in days, used for proration math
    /// (fixed values, not calendar-exact)
    pub fn nominal_days(&self) -> i64 {
        match self {
            Self::Monthly => 30,
            Self::Annual => 365,
        }
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription lifecycle status
///
/// `canceled` is terminal for the current cycle; a fresh purchase opens a
/// new lifecycle for the same tenant. `expired` is reached when a period
/// lapses without renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_is_strict() {
        assert!(PlanTier::Starter.order() < PlanTier::Pro.order());
        assert!(PlanTier::Pro.order() < PlanTier::Elite.order());
    }

    #[test]
    fn next_up_walks_the_ladder() {
        assert_eq!(PlanTier::Starter.next_up(), Some(PlanTier::Pro));
        assert_eq!(PlanTier::Pro.next_up(), Some(PlanTier::Elite));
        assert_eq!(PlanTier::Elite.next_up(), None);
    }

    #[test]
    fn billing_period_parse_accepts_yearly_alias() {
        assert_eq!(BillingPeriod::parse("annual"), Some(BillingPeriod::Annual));
        assert_eq!(BillingPeriod::parse("yearly"), Some(BillingPeriod::Annual));
        assert_eq!(BillingPeriod::parse("MONTHLY"), Some(BillingPeriod::Monthly));
        assert_eq!(BillingPeriod::parse("weekly"), None);
    }

    #[test]
    fn nominal_days_are_fixed() {
        assert_eq!(BillingPeriod::Monthly.nominal_days(), 30);
        assert_eq!(BillingPeriod::Annual.nominal_days(), 365);
    }
}
