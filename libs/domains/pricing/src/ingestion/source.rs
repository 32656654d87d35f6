use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::models::{CloudProvider, IngestionScope, PriceRecord};

/// Stream of normalised records produced by a pricing source
pub type RecordStream = BoxStream<'static, Result<PriceRecord, SourceError>>;

/// Error type for pricing source operations
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scope not supported by {source_name}: {scope}")]
    UnsupportedScope {
        source_name: &'static str,
        scope: IngestionScope,
    },

    #[error("API error: {0}")]
    Api(String),
}

/// Integration normalising one provider's pricing data into catalog records.
///
/// `open` returns lazily: records are pulled one at a time so the pipeline
/// can bound every fetch with a timeout and stop on cancellation.
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Provider whose scopes this source serves
    fn provider(&self) -> CloudProvider;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn open(&self, scope: &IngestionScope) -> Result<RecordStream, SourceError>;
}
