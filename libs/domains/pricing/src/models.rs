use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::error::PricingError;

/// Open-ended provider-specific dimensions (instance type, tenancy, term type, ...).
///
/// A `BTreeMap` keeps iteration order stable, which the price fingerprint relies on.
pub type Attributes = BTreeMap<String, String>;

/// Cloud provider enumeration
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    Default,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "cloud_provider")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CloudProvider {
    #[default]
    #[sea_orm(string_value = "aws")]
    Aws,
    #[sea_orm(string_value = "azure")]
    Azure,
    #[sea_orm(string_value = "gcp")]
    Gcp,
}

/// Ingestion job status
///
/// ```text
/// pending --start--> running --success--> succeeded
///                    running --error----> failed
/// ```
///
/// `succeeded` and `failed` are terminal; a retry is a new job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    Default,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "ingestion_status")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    #[default]
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// A pending job may also fail directly: the reaper and cancellation
    /// can close a job that never got to start.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

/// Catalog product: one SKU/meter in one location/service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub provider: CloudProvider,
    pub sku: String,
    /// Provider meter identifier; empty when the provider has none (AWS)
    pub meter_id: String,
    pub location: String,
    pub service: String,
    pub family: String,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// DTO for upserting a product. Identity is `(provider, sku, meter_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    pub provider: CloudProvider,
    #[validate(length(min = 1, max = 255))]
    pub sku: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub meter_id: String,
    #[validate(length(min = 1, max = 100))]
    pub location: String,
    #[validate(length(min = 1, max = 255))]
    pub service: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub family: String,
    #[serde(default)]
    pub attributes: Attributes,
}

/// One priced variant (term, tier) of a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: i64,
    pub product_id: i64,
    pub hash: String,
    pub currency: String,
    pub unit: String,
    pub price: Decimal,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

/// DTO for upserting a price under an existing product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewPrice {
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
    #[validate(length(min = 1, max = 100))]
    pub unit: String,
    pub price: Decimal,
    #[serde(default)]
    pub attributes: Attributes,
}

impl NewPrice {
    /// Content fingerprint used for idempotent upserts.
    ///
    /// Derived from the normalised pricing attributes, unit and currency only.
    /// The amount is deliberately left out: a provider price revision that
    /// keeps the same attributes maps onto the existing row.
    pub fn fingerprint(&self) -> String {
        price_hash(&self.unit, &self.currency, &self.attributes)
    }
}

/// SHA-256 over the canonical JSON of `{attributes, currency, unit}`.
///
/// Keys and values are trimmed; attribute keys are sorted by the `BTreeMap`.
pub fn price_hash(unit: &str, currency: &str, attributes: &Attributes) -> String {
    let normalized: Attributes = attributes
        .iter()
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let canonical = serde_json::json!({
        "attributes": normalized,
        "currency": currency.trim().to_ascii_uppercase(),
        "unit": unit.trim(),
    });

    format!("{:x}", Sha256::digest(canonical.to_string().as_bytes()))
}

/// Result of an idempotent upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upserted {
    pub id: i64,
    /// `false` when the row already existed and the call was a no-op
    pub inserted: bool,
}

/// Coarse exact-match index scan. `None` leaves a column unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub provider: Option<CloudProvider>,
    pub location: Option<String>,
    pub service: Option<String>,
    pub family: Option<String>,
}

impl ProductQuery {
    pub fn matches(&self, product: &Product) -> bool {
        self.provider.is_none_or(|p| p == product.provider)
            && self.location.as_deref().is_none_or(|l| l == product.location)
            && self.service.as_deref().is_none_or(|s| s == product.service)
            && self.family.as_deref().is_none_or(|f| f == product.family)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.provider.is_none()
            && self.location.is_none()
            && self.service.is_none()
            && self.family.is_none()
    }
}

/// One unit of ingestion work: `(provider, location, service)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IngestionScope {
    pub provider: CloudProvider,
    pub location: String,
    pub service: String,
}

impl IngestionScope {
    pub fn new(
        provider: CloudProvider,
        location: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            location: location.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for IngestionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.location, self.service)
    }
}

/// Parses `provider:location:service`, e.g. `aws:eu-west-1:AmazonEC2`
impl FromStr for IngestionScope {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let [provider, location, service] = parts.as_slice() else {
            return Err(PricingError::Configuration(format!(
                "scope '{}' must look like provider:location:service",
                s
            )));
        };

        let provider = CloudProvider::from_str(provider).map_err(|_| {
            PricingError::Configuration(format!("unknown provider '{}' in scope '{}'", provider, s))
        })?;

        if location.is_empty() || service.is_empty() {
            return Err(PricingError::Configuration(format!(
                "scope '{}' has an empty location or service",
                s
            )));
        }

        Ok(Self::new(provider, *location, *service))
    }
}

/// Tracked unit of work refreshing one scope of the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub provider: CloudProvider,
    pub location: String,
    pub service: String,
    pub status: JobStatus,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn scope(&self) -> IngestionScope {
        IngestionScope::new(self.provider, &self.location, &self.service)
    }
}

/// A normalised record streamed out of a pricing source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub product: NewProduct,
    #[serde(default)]
    pub prices: Vec<NewPrice>,
}
