//! AWS bulk offer files
//!
//! `GET {base}/offers/v1.0/aws/{service}/current/{region}/index.json` returns
//! every product of a service in one region together with its OnDemand and
//! Reserved terms. Products are keyed by SKU; terms reference the SKU.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use domain_pricing::{
    Attributes, CloudProvider, IngestionScope, NewPrice, NewProduct, PriceRecord, PricingSource,
    RecordStream, SourceError,
};
use futures::{StreamExt, stream};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ProviderError, ProviderResult, check_status, usage_bound};

#[derive(Debug, Deserialize)]
struct OfferFile {
    #[serde(default)]
    products: HashMap<String, OfferProduct>,
    /// term type -> sku -> offer term code -> term
    #[serde(default)]
    terms: HashMap<String, HashMap<String, HashMap<String, OfferTerm>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferProduct {
    sku: String,
    #[serde(default)]
    product_family: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferTerm {
    offer_term_code: String,
    #[serde(default)]
    price_dimensions: HashMap<String, PriceDimension>,
    #[serde(default)]
    term_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceDimension {
    unit: String,
    #[serde(default)]
    price_per_unit: BTreeMap<String, String>,
    begin_range: Option<String>,
    end_range: Option<String>,
}

/// Streams one regional offer file per scope
pub struct AwsOfferSource {
    client: Client,
    base_url: String,
}

impl AwsOfferSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn offer_url(&self, scope: &IngestionScope) -> String {
        format!(
            "{}/offers/v1.0/aws/{}/current/{}/index.json",
            self.base_url,
            urlencoding::encode(&scope.service),
            urlencoding::encode(&scope.location)
        )
    }

    async fn fetch(&self, scope: &IngestionScope) -> ProviderResult<Vec<PriceRecord>> {
        let url = self.offer_url(scope);
        info!(url = %url, scope = %scope, "Fetching AWS offer file");

        let response = check_status(self.client.get(&url).send().await?).await?;
        let body = response.bytes().await?;
        parse_offer_file(&body, scope)
    }
}

#[async_trait]
impl PricingSource for AwsOfferSource {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    fn name(&self) -> &'static str {
        "aws-offer-file"
    }

    async fn open(&self, scope: &IngestionScope) -> Result<RecordStream, SourceError> {
        let records = self.fetch(scope).await?;
        Ok(stream::iter(records.into_iter().map(Ok)).boxed())
    }
}

/// Normalises an offer file into catalog records, ordered by SKU.
///
/// Product attribute keys become UpperCamelCase (`instanceType` ->
/// `InstanceType`). Each price dimension becomes one price per currency,
/// tagged with `TermType`, `OfferTermCode`, the term attributes, and the
/// usage range as `StartUsageAmount` / `EndUsageAmount`.
pub fn parse_offer_file(body: &[u8], scope: &IngestionScope) -> ProviderResult<Vec<PriceRecord>> {
    let offer: OfferFile =
        serde_json::from_slice(body).map_err(|e| ProviderError::ParseError(e.to_string()))?;

    let mut records: BTreeMap<String, PriceRecord> = offer
        .products
        .into_values()
        .map(|product| {
            let location = product
                .attributes
                .get("regionCode")
                .cloned()
                .unwrap_or_else(|| scope.location.clone());
            let attributes: Attributes = product
                .attributes
                .into_iter()
                .map(|(k, v)| (upper_camel(&k), v))
                .collect();

            let record = PriceRecord {
                product: NewProduct {
                    provider: CloudProvider::Aws,
                    sku: product.sku.clone(),
                    meter_id: String::new(),
                    location,
                    service: scope.service.clone(),
                    family: product.product_family,
                    attributes,
                },
                prices: Vec::new(),
            };
            (product.sku, record)
        })
        .collect();

    for (term_type, by_sku) in offer.terms {
        for (sku, terms) in by_sku {
            let Some(record) = records.get_mut(&sku) else {
                debug!(sku = %sku, term_type = %term_type, "Term references unknown product");
                continue;
            };
            for term in terms.into_values() {
                record.prices.extend(term_prices(&term_type, term)?);
            }
        }
    }

    Ok(records.into_values().collect())
}

fn term_prices(term_type: &str, term: OfferTerm) -> ProviderResult<Vec<NewPrice>> {
    let mut prices = Vec::new();

    for dimension in term.price_dimensions.into_values() {
        let mut attributes: Attributes = term.term_attributes.clone();
        attributes.insert("TermType".to_string(), term_type.to_string());
        attributes.insert("OfferTermCode".to_string(), term.offer_term_code.clone());
        if let Some(begin) = &dimension.begin_range {
            attributes.insert("StartUsageAmount".to_string(), range_bound(begin)?);
        }
        if let Some(end) = &dimension.end_range {
            attributes.insert("EndUsageAmount".to_string(), range_bound(end)?);
        }

        for (currency, amount) in &dimension.price_per_unit {
            let price: Decimal = amount.parse().map_err(|e| {
                ProviderError::ParseError(format!("price '{}' for {}: {}", amount, currency, e))
            })?;
            prices.push(NewPrice {
                currency: currency.clone(),
                unit: dimension.unit.clone(),
                price,
                attributes: attributes.clone(),
            });
        }
    }

    Ok(prices)
}

/// `Inf` stays as is; numbers are rendered canonically
fn range_bound(raw: &str) -> ProviderResult<String> {
    if raw.eq_ignore_ascii_case("inf") {
        return Ok("Inf".to_string());
    }
    raw.parse::<Decimal>()
        .map(usage_bound)
        .map_err(|e| ProviderError::ParseError(format!("usage range '{}': {}", raw, e)))
}

fn upper_camel(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
