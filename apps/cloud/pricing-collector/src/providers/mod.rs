//! Pricing sources
//!
//! Each source turns one provider's published price data into normalised
//! catalog records for a single `(provider, location, service)` scope.

pub mod aws;
pub mod azure;
pub mod file;

use std::sync::Arc;

use domain_pricing::{CloudProvider, PricingSource, SourceError};
use rust_decimal::Decimal;
use thiserror::Error;

pub use aws::AwsOfferSource;
pub use azure::AzureRetailSource;
pub use file::JsonLinesSource;

use crate::config::Config;

/// Errors raised while talking to a provider's pricing endpoint
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl From<ProviderError> for SourceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::HttpError(e) => SourceError::Http(e.to_string()),
            ProviderError::ParseError(msg) => SourceError::Parse(msg),
            e @ ProviderError::ApiError { .. } => SourceError::Api(e.to_string()),
        }
    }
}

/// Rejects non-2xx responses, keeping the start of the body for the job's error message
async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::ApiError {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

/// Canonical rendering of a tier lower bound, e.g. `0`, `10240`
fn usage_bound(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Sources to register with the pipeline, one per provider.
///
/// A configured file directory takes over every provider, so a catalog can
/// be loaded fully offline.
pub fn build_sources(config: &Config) -> Vec<Arc<dyn PricingSource>> {
    if let Some(dir) = &config.file_dir {
        return [CloudProvider::Aws, CloudProvider::Azure, CloudProvider::Gcp]
            .into_iter()
            .map(|provider| Arc::new(JsonLinesSource::new(provider, dir.clone())) as Arc<dyn PricingSource>)
            .collect();
    }

    let client = reqwest::Client::new();
    let mut sources: Vec<Arc<dyn PricingSource>> = Vec::new();
    if config.aws.enabled {
        sources.push(Arc::new(AwsOfferSource::new(client.clone(), &config.aws.pricing_url)));
    }
    if config.azure.enabled {
        sources.push(Arc::new(AzureRetailSource::new(client, &config.azure.pricing_url)));
    }
    sources
}
