//! Cloud commitment discount recommendation and purchasing.
//!
//! The crate normalizes reservation recommendations from AWS, Azure and GCP
//! into one schema, lets callers filter and scale them, resolves each one to
//! a concrete catalog offering, and executes purchases with idempotent
//! identifiers and structured results.

// Core modules
pub mod config;
pub mod error;
pub mod model;
pub mod regions;
pub mod retry;

// Provider abstraction and concrete providers
pub mod providers;

// Pipeline stages
pub mod purchase;
pub mod recommendations;
pub mod reports;
pub mod stats;

// Re-export core types
pub use config::Config;
pub use error::{Error, Result};
pub use model::{
    CloudProvider, Commitment, CommitmentType, OfferingDetails, PaymentOption, PurchaseResult,
    Recommendation, ServiceDetails, ServiceType, Term,
};
pub use providers::{
    default_registry, register_all, Provider, ProviderRegistry, ProviderSettings,
    RecommendationQuery, ServiceClient,
};
pub use purchase::PurchaseRunner;

/// Build a provider from a fully populated registry
pub fn create_provider(
    name: &str,
    settings: &ProviderSettings,
) -> Result<std::sync::Arc<dyn Provider>> {
    default_registry().create(name, settings)
}
