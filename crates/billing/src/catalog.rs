//! Plan catalog
//!
//! Immutable reference data for plan tiers: prices, included-student
//! limits, and per-extra-student rates. The catalog is injected into the
//! services that need it (never a global) and carries a version string so
//! pricing can change without redeploying billing logic. Subscriptions
//! snapshot the price paid at purchase time, so catalog updates never
//! re-price historical rows.

use coachdesk_shared::{BillingPeriod, PlanTier};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// A single plan tier's reference data
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub tier: PlanTier,
    pub name: String,
    pub monthly_price: Decimal,
    pub annual_price: Decimal,
    pub monthly_student_limit: i32,
    pub annual_student_limit: i32,
    pub extra_student_price: Decimal,
}

impl Plan {
    /// Price for the given billing cycle
    pub fn price(&self, period: BillingPeriod) -> Decimal {
        match period {
            BillingPeriod::Monthly => self.monthly_price,
            BillingPeriod::Annual => self.annual_price,
        }
    }

    /// Included-student limit for the given billing cycle
    pub fn student_limit(&self, period: BillingPeriod) -> i32 {
        match period {
            BillingPeriod::Monthly => self.monthly_student_limit,
            BillingPeriod::Annual => self.annual_student_limit,
        }
    }
}

/// How a provider product/offer code was resolved to a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeResolution {
    /// Exact match against the product-code table
    Exact,
    /// Case-insensitive substring match against table keys
    Substring,
    /// Keyword heuristic against plan-name fragments
    Heuristic,
    /// Nothing matched; lowest tier applied. Flag for manual review.
    Fallback,
}

/// Result of resolving a provider product code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub tier: PlanTier,
    pub period: BillingPeriod,
    pub resolution: CodeResolution,
}

impl ResolvedPlan {
    pub fn needs_manual_review(&self) -> bool {
        self.resolution == CodeResolution::Fallback
    }
}

/// Injected plan catalog service
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    version: String,
    plans: Vec<Plan>,
    /// Provider product/offer code -> (tier, cycle)
    product_codes: HashMap<String, (PlanTier, BillingPeriod)>,
}

impl PlanCatalog {
    /// The built-in catalog. Prices are in BRL.
    pub fn builtin() -> Self {
        let plans = vec![
            Plan {
                tier: PlanTier::Starter,
                name: "Starter".to_string(),
                monthly_price: Decimal::new(9700, 2),
                annual_price: Decimal::new(97000, 2),
                monthly_student_limit: 15,
                annual_student_limit: 20,
                extra_student_price: Decimal::new(647, 2),
            },
            Plan {
                tier: PlanTier::Pro,
                name: "Pro".to_string(),
                monthly_price: Decimal::new(14700, 2),
                annual_price: Decimal::new(147000, 2),
                monthly_student_limit: 40,
                annual_student_limit: 50,
                extra_student_price: Decimal::new(497, 2),
            },
            Plan {
                tier: PlanTier::Elite,
                name: "Elite".to_string(),
                monthly_price: Decimal::new(24700, 2),
                annual_price: Decimal::new(247000, 2),
                monthly_student_limit: 120,
                annual_student_limit: 150,
                extra_student_price: Decimal::new(397, 2),
            },
        ];

        let mut product_codes = HashMap::new();
        for (code, tier, period) in [
            ("CD_STARTER_MENSAL", PlanTier::Starter, BillingPeriod::Monthly),
            ("CD_STARTER_ANUAL", PlanTier::Starter, BillingPeriod::Annual),
            ("CD_PRO_MENSAL", PlanTier::Pro, BillingPeriod::Monthly),
            ("CD_PRO_ANUAL", PlanTier::Pro, BillingPeriod::Annual),
            ("CD_ELITE_MENSAL", PlanTier::Elite, BillingPeriod::Monthly),
            ("CD_ELITE_ANUAL", PlanTier::Elite, BillingPeriod::Annual),
        ] {
            product_codes.insert(code.to_string(), (tier, period));
        }

        Self {
            version: "2025-01".to_string(),
            plans,
            product_codes,
        }
    }

    /// Catalog version identifier, recorded alongside audit entries
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a plan by tier
    pub fn get(&self, tier: PlanTier) -> &Plan {
        // The catalog always contains one plan per tier variant.
        self.plans
            .iter()
            .find(|p| p.tier == tier)
            .unwrap_or(&self.plans[0])
    }

    /// The lowest tier in the catalog, used as the never-reject fallback
    pub fn lowest(&self) -> &Plan {
        self.get(PlanTier::Starter)
    }

    /// The plan strictly above the given tier, if one exists
    pub fn next_tier_above(&self, tier: PlanTier) -> Option<&Plan> {
        tier.next_up().map(|t| self.get(t))
    }

    /// Resolve a provider product/offer code to `(tier, cycle)`.
    ///
    /// Three-tier resolution: exact table match, then case-insensitive
    /// substring match of the code against table keys, then a keyword
    /// heuristic against plan-name fragments. A missed charge is worse
    /// than a mis-tiered one, so nothing is ever rejected: the final
    /// fallback is the lowest tier, flagged for manual review.
    pub fn resolve_product_code(&self, code: &str) -> ResolvedPlan {
        let trimmed = code.trim();

        // Tier 1: exact match
        if let Some(&(tier, period)) = self.product_codes.get(trimmed) {
            return ResolvedPlan {
                tier,
                period,
                resolution: CodeResolution::Exact,
            };
        }

        // Tier 2: case-insensitive substring match against table keys
        let upper = trimmed.to_uppercase();
        for (key, &(tier, period)) in &self.product_codes {
            let key_upper = key.to_uppercase();
            if upper.contains(&key_upper) || (!upper.is_empty() && key_upper.contains(&upper)) {
                return ResolvedPlan {
                    tier,
                    period,
                    resolution: CodeResolution::Substring,
                };
            }
        }

        // Tier 3: keyword heuristic on plan-name fragments
        let annual = ["ANUAL", "ANNUAL", "YEARLY", "12M"]
            .iter()
            .any(|marker| upper.contains(marker));
        let period = if annual {
            BillingPeriod::Annual
        } else {
            BillingPeriod::Monthly
        };

        let tier = if upper.contains("ELITE") {
            Some(PlanTier::Elite)
        } else if upper.contains("PRO") {
            Some(PlanTier::Pro)
        } else if upper.contains("START") {
            Some(PlanTier::Starter)
        } else {
            None
        };

        if let Some(tier) = tier {
            return ResolvedPlan {
                tier,
                period,
                resolution: CodeResolution::Heuristic,
            };
        }

        // Fallback: lowest tier, keep the cycle hint if the code carried one
        tracing::warn!(
            product_code = %code,
            fallback_tier = %self.lowest().tier,
            "Unresolvable product code - applying lowest tier, flag for manual review"
        );
        ResolvedPlan {
            tier: self.lowest().tier,
            period,
            resolution: CodeResolution::Fallback,
        }
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_code_wins() {
        let catalog = PlanCatalog::builtin();
        let resolved = catalog.resolve_product_code("CD_PRO_ANUAL");
        assert_eq!(resolved.tier, PlanTier::Pro);
        assert_eq!(resolved.period, BillingPeriod::Annual);
        assert_eq!(resolved.resolution, CodeResolution::Exact);
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let catalog = PlanCatalog::builtin();
        let resolved = catalog.resolve_product_code("offer-cd_elite_mensal-v2");
        assert_eq!(resolved.tier, PlanTier::Elite);
        assert_eq!(resolved.period, BillingPeriod::Monthly);
        assert_eq!(resolved.resolution, CodeResolution::Substring);
    }

    #[test]
    fn keyword_heuristic_detects_tier_and_cycle() {
        let catalog = PlanCatalog::builtin();

        let resolved = catalog.resolve_product_code("PLANO-PRO-2024");
        assert_eq!(resolved.tier, PlanTier::Pro);
        assert_eq!(resolved.period, BillingPeriod::Monthly);
        assert_eq!(resolved.resolution, CodeResolution::Heuristic);

        let resolved = catalog.resolve_product_code("ELITE ANUAL PROMO");
        assert_eq!(resolved.tier, PlanTier::Elite);
        assert_eq!(resolved.period, BillingPeriod::Annual);
    }

    #[test]
    fn unresolvable_code_falls_back_to_lowest_tier() {
        let catalog = PlanCatalog::builtin();
        let resolved = catalog.resolve_product_code("XYZ-UNKNOWN-OFFER");
        assert_eq!(resolved.tier, PlanTier::Starter);
        assert_eq!(resolved.resolution, CodeResolution::Fallback);
        assert!(resolved.needs_manual_review());
    }

    #[test]
    fn fallback_preserves_annual_marker() {
        let catalog = PlanCatalog::builtin();
        let resolved = catalog.resolve_product_code("MYSTERY-ANNUAL-OFFER");
        assert_eq!(resolved.tier, PlanTier::Starter);
        assert_eq!(resolved.period, BillingPeriod::Annual);
    }

    #[test]
    fn plan_limits_differ_by_cycle() {
        let catalog = PlanCatalog::builtin();
        let starter = catalog.get(PlanTier::Starter);
        assert_eq!(starter.student_limit(BillingPeriod::Monthly), 15);
        assert_eq!(starter.student_limit(BillingPeriod::Annual), 20);
        assert_eq!(starter.price(BillingPeriod::Monthly), Decimal::new(9700, 2));
    }
}
