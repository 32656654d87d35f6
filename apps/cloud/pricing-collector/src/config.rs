//! Configuration for the pricing collector

use std::path::PathBuf;
use std::time::Duration;

use core_config::{ConfigError, Environment, FromEnv, env_list, env_or_default, env_parse};
use database::postgres::PostgresConfig;
use domain_pricing::{IngestionScope, PipelineConfig};

pub const DEFAULT_AWS_PRICING_URL: &str = "https://pricing.us-east-1.amazonaws.com";
pub const DEFAULT_AZURE_PRICING_URL: &str = "https://prices.azure.com/api/retail/prices";

/// Scopes refreshed when neither the command line nor `DEFAULT_SCOPES` names any
const FALLBACK_SCOPES: [&str; 4] = [
    "aws:us-east-1:AmazonEC2",
    "aws:us-east-1:AmazonS3",
    "azure:eastus:Virtual Machines",
    "azure:eastus:Storage",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database: PostgresConfig,
    pub pipeline: PipelineConfig,
    pub aws: SourceConfig,
    pub azure: SourceConfig,
    /// When set, every provider is served from `{dir}/{provider}-{location}-{service}.jsonl`
    pub file_dir: Option<PathBuf>,
    pub default_scopes: Vec<IngestionScope>,
}

/// One network pricing source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub enabled: bool,
    pub pricing_url: String,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = PipelineConfig::default();
        let fetch_timeout = env_parse("INGEST_FETCH_TIMEOUT_SECS", defaults.fetch_timeout.as_secs())?;
        let max_job = env_parse("INGEST_MAX_JOB_SECS", defaults.max_job_duration.as_secs())?;

        let file_dir = env_or_default("PRICING_FILE_DIR", "");

        Ok(Config {
            environment: Environment::from_env(),
            database: PostgresConfig::from_env()?,
            pipeline: PipelineConfig::new()
                .with_fetch_timeout(Duration::from_secs(fetch_timeout))
                .with_max_job_duration(Duration::from_secs(max_job)),
            aws: SourceConfig {
                enabled: env_parse("AWS_ENABLED", true)?,
                pricing_url: env_or_default("AWS_PRICING_URL", DEFAULT_AWS_PRICING_URL),
            },
            azure: SourceConfig {
                enabled: env_parse("AZURE_ENABLED", true)?,
                pricing_url: env_or_default("AZURE_PRICING_URL", DEFAULT_AZURE_PRICING_URL),
            },
            file_dir: (!file_dir.trim().is_empty()).then(|| PathBuf::from(file_dir.trim())),
            default_scopes: parse_scopes(env_list("DEFAULT_SCOPES"))?,
        })
    }
}

fn parse_scopes(raw: Vec<String>) -> Result<Vec<IngestionScope>, ConfigError> {
    let raw = if raw.is_empty() {
        FALLBACK_SCOPES.iter().map(|s| s.to_string()).collect()
    } else {
        raw
    };

    raw.iter()
        .map(|s| {
            s.parse().map_err(|e: domain_pricing::PricingError| ConfigError::ParseError {
                key: "DEFAULT_SCOPES".to_string(),
                details: e.to_string(),
            })
        })
        .collect()
}
