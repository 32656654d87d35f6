use thiserror::Error;
use uuid::Uuid;

use crate::models::{CloudProvider, IngestionScope, JobStatus};

/// Result type for pricing operations
pub type PricingResult<T> = Result<T, PricingError>;

/// Errors that can occur in the pricing domain
///
/// A price that cannot be found is not an error: resolution returns
/// [`crate::Resolution::NotFound`] as an `Ok` value.
#[derive(Debug, Error)]
pub enum PricingError {
    /// Malformed request or filter (missing field, conflicting quantities, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Attribute filter carries a regex that does not compile
    #[error("Configuration error: invalid regex '{pattern}' for attribute '{key}': {source}")]
    InvalidRegex {
        key: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Price references a product that does not exist
    #[error("Store error: product {0} does not exist")]
    ProductNotFound(i64),

    /// Ingestion job not found
    #[error("Ingestion job not found: {0}")]
    JobNotFound(Uuid),

    /// Another job is already pending or running on this scope
    #[error("Ingestion scope {0} already has an active job")]
    ScopeBusy(IngestionScope),

    /// Compare-and-set on the job status lost, or the move is not allowed
    #[error("Ingestion job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// No pricing source registered for the provider
    #[error("No pricing source registered for provider {0}")]
    SourceNotRegistered(CloudProvider),

    /// Ingestion job failed; the job row carries the same message
    #[error("Ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),

    /// Database error
    #[error("Store error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl PricingError {
    /// ConfigurationError in the resolution taxonomy
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PricingError::Configuration(_) | PricingError::InvalidRegex { .. }
        )
    }

    /// Catalog integrity or connectivity failure
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            PricingError::ProductNotFound(_) | PricingError::Database(_)
        )
    }
}

/// Why an ingestion job ended up `failed`.
///
/// The `Display` output is persisted as the job's `error_msg`; it always
/// starts with the cause tag so operators can tell causes apart.
#[derive(Debug, Clone, Error)]
pub enum IngestionError {
    #[error("source: {0}")]
    Source(String),

    #[error("store: {0}")]
    Store(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("reaped: {0}")]
    Reaped(String),
}

impl IngestionError {
    /// Short cause tag, also used as a metrics label
    pub fn cause(&self) -> &'static str {
        match self {
            IngestionError::Source(_) => "source",
            IngestionError::Store(_) => "store",
            IngestionError::Timeout(_) => "timeout",
            IngestionError::Cancelled(_) => "cancelled",
            IngestionError::Reaped(_) => "reaped",
        }
    }
}
