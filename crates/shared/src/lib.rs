//! Shared types and helpers used across CoachDesk services

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{BillingPeriod, PlanTier, SubscriptionStatus};
