// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Pending-activation creation carries the full purchase
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CoachDesk Billing Module
//!
//! Subscription billing reconciliation for the CoachDesk back office.
//! Three payment providers deliver webhooks with different vocabularies,
//! auth schemes, and retry behavior; this crate normalizes them into one
//! canonical event stream and drives the subscription lifecycle from it.
//!
//! ## Features
//!
//! - **Provider Adapters**: Hotmart / Kiwify / Cakto webhook parsing and auth
//! - **Dedup Ledger**: at-least-once delivery collapsed to exactly-once processing
//! - **Subscription Lifecycle**: purchase, renewal, cancellation, overdue, reactivation
//! - **Pending Activations**: payments for unknown emails are parked, never dropped
//! - **Commission Classification**: first-charge-only affiliate commission
//! - **Proration**: mid-cycle upgrade quotes
//! - **Overage**: extra-student accumulation with upgrade recommendations
//! - **Trial Reminders**: day-before and final-hours notifications
//! - **Invariants**: runnable read-only consistency checks

pub mod accounts;
pub mod activation;
pub mod catalog;
pub mod commission;
pub mod email;
pub mod error;
pub mod events;
pub mod invariants;
pub mod ledger;
pub mod overage;
pub mod proration;
pub mod providers;
pub mod subscriptions;
pub mod trial;


// Accounts
pub use accounts::{AccountService, TenantAccount};

// Activation
pub use activation::{ActivationService, PendingActivation};

// Catalog
pub use catalog::{CodeResolution, Plan, PlanCatalog, ResolvedPlan};

// Commission
pub use commission::{CommissionClassifier, CommissionService};

// Email
pub use email::BillingEmailService;

// Error
pub use error::{BillingError, BillingResult, RejectionReason};

// Events
pub use events::{
    BillingEventKind, CanonicalBillingEvent, CommissionEntry, EventSubscription, Provider,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{ClaimOutcome, DedupLedger};

// Overage
pub use overage::{OverageReport, OverageService, RecomputeOutcome, TierRecommendation};

// Proration
pub use proration::{ProrationCalculator, ProrationQuote};

// Providers
pub use providers::{CaktoAdapter, HotmartAdapter, KiwifyAdapter, ProviderAdapter, WebhookAuth};

// Subscriptions
pub use subscriptions::{
    add_billing_cycle, ProcessOutcome, Subscription, SubscriptionService,
};

// Trial
pub use trial::{ReminderKind, SweepStats, TrialNotifier};

use std::sync::Arc;

use sqlx::PgPool;

/// Result of pushing one raw webhook through the full pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Claimed and applied to the subscription state machine
    Processed(ProcessOutcome),
    /// Another delivery already claimed this transaction
    Duplicate,
}

impl WebhookDisposition {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Processed(outcome) => outcome.action(),
            Self::Duplicate => "duplicate_ignored",
        }
    }
}

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: PlanCatalog,
    pub accounts: AccountService,
    pub ledger: DedupLedger,
    pub subscriptions: SubscriptionService,
    pub commission: CommissionService,
    pub proration: ProrationCalculator,
    pub overage: OverageService,
    pub activation: ActivationService,
    pub trial: TrialNotifier,
    pub email: Arc<BillingEmailService>,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> Self {
        Self::new(pool, PlanCatalog::builtin(), CommissionClassifier::from_env())
    }

    /// Create a new billing service with an explicit catalog and classifier
    pub fn new(pool: PgPool, catalog: PlanCatalog, classifier: CommissionClassifier) -> Self {
        let email = Arc::new(BillingEmailService::from_env());
        let accounts = AccountService::new(pool.clone());
        let activation = ActivationService::new(pool.clone());
        let commission = CommissionService::new(pool.clone(), classifier);

        Self {
            catalog: catalog.clone(),
            accounts: accounts.clone(),
            ledger: DedupLedger::new(pool.clone()),
            subscriptions: SubscriptionService::new(
                pool.clone(),
                catalog.clone(),
                accounts,
                ActivationService::new(pool.clone()),
                commission.clone(),
                Arc::clone(&email),
            ),
            commission,
            proration: ProrationCalculator::new(catalog.clone()),
            overage: OverageService::new(pool.clone(), catalog),
            activation,
            trial: TrialNotifier::new(pool.clone(), Arc::clone(&email)),
            email,
            invariants: InvariantChecker::new(pool),
        }
    }

    /// Full webhook pipeline for an already-parsed canonical event:
    /// claim it in the dedup ledger, apply it to the state machine,
    /// record the processing result for audit.
    pub async fn process_event(
        &self,
        event: &CanonicalBillingEvent,
    ) -> BillingResult<WebhookDisposition> {
        let claim = self
            .ledger
            .try_claim(
                event.provider,
                &event.external_transaction_id,
                event.kind.as_str(),
            )
            .await?;

        if !claim.is_claimed() {
            return Ok(WebhookDisposition::Duplicate);
        }

        match self.subscriptions.apply_event(event).await {
            Ok(outcome) => {
                if let Err(e) = self
                    .ledger
                    .record_result(
                        event.provider,
                        &event.external_transaction_id,
                        outcome.action(),
                        None,
                    )
                    .await
                {
                    tracing::error!(
                        external_transaction_id = %event.external_transaction_id,
                        error = %e,
                        "Failed to record processing result"
                    );
                }
                Ok(WebhookDisposition::Processed(outcome))
            }
            Err(e) => {
                if let Err(audit_err) = self
                    .ledger
                    .record_result(
                        event.provider,
                        &event.external_transaction_id,
                        "error",
                        Some(&e.to_string()),
                    )
                    .await
                {
                    tracing::error!(
                        external_transaction_id = %event.external_transaction_id,
                        error = %audit_err,
                        "Failed to record processing error"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayed_delivery_acks_as_duplicate() {
        // A lost dedup claim skips the state machine entirely; the
        // provider still gets a descriptive ACK.
        assert_eq!(WebhookDisposition::Duplicate.action(), "duplicate_ignored");
    }

    #[test]
    fn processed_disposition_reports_the_outcome() {
        let disposition = WebhookDisposition::Processed(ProcessOutcome::SubscriptionRenewed);
        assert_eq!(disposition.action(), "subscription_renewed");
    }
}
