//! Azure Retail Prices API
//!
//! Public, unauthenticated and paged: each response carries up to 1000
//! `Items` and a `NextPageLink` until the last page.
//! https://learn.microsoft.com/rest/api/cost-management/retail-prices/azure-retail-prices

use std::collections::BTreeMap;

use async_trait::async_trait;
use domain_pricing::{
    Attributes, CloudProvider, IngestionScope, NewPrice, NewProduct, PriceRecord, PricingSource,
    RecordStream, SourceError,
};
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::{ProviderError, ProviderResult, check_status, usage_bound};

const API_VERSION: &str = "2023-01-01-preview";

#[derive(Debug, Deserialize)]
struct RetailPage {
    #[serde(rename = "Items", default)]
    items: Vec<RetailItem>,
    #[serde(rename = "NextPageLink")]
    next_page_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetailItem {
    currency_code: String,
    #[serde(default)]
    tier_minimum_units: Decimal,
    retail_price: Decimal,
    arm_region_name: String,
    meter_id: String,
    meter_name: String,
    product_id: String,
    sku_id: String,
    product_name: String,
    sku_name: String,
    service_name: String,
    #[serde(default)]
    service_family: String,
    unit_of_measure: String,
    #[serde(rename = "type")]
    price_type: String,
    #[serde(default)]
    arm_sku_name: Option<String>,
    #[serde(default)]
    reservation_term: Option<String>,
}

/// Pages through the Retail Prices API for one region and service
pub struct AzureRetailSource {
    client: Client,
    base_url: String,
}

impl AzureRetailSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn first_page_url(&self, scope: &IngestionScope) -> String {
        let filter = format!(
            "armRegionName eq '{}' and serviceName eq '{}'",
            odata_escape(&scope.location),
            odata_escape(&scope.service)
        );
        format!(
            "{}?api-version={}&$filter={}",
            self.base_url,
            API_VERSION,
            urlencoding::encode(&filter)
        )
    }
}

async fn fetch_page(client: &Client, url: &str) -> ProviderResult<RetailPage> {
    debug!(url, "Fetching Azure retail prices page");
    let response = check_status(client.get(url).send().await?).await?;
    response
        .json()
        .await
        .map_err(|e| ProviderError::ParseError(e.to_string()))
}

#[async_trait]
impl PricingSource for AzureRetailSource {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    fn name(&self) -> &'static str {
        "azure-retail-prices"
    }

    /// Pages are fetched lazily, one per poll of an exhausted page, so the
    /// pipeline's fetch timeout bounds each request.
    async fn open(&self, scope: &IngestionScope) -> Result<RecordStream, SourceError> {
        let client = self.client.clone();
        let first = self.first_page_url(scope);

        let pages = stream::try_unfold(Some(first), move |next| {
            let client = client.clone();
            async move {
                let Some(url) = next else {
                    return Ok(None);
                };
                let page = fetch_page(&client, &url).await.map_err(SourceError::from)?;
                let next = page.next_page_link.clone().filter(|link| !link.is_empty());
                Ok::<_, SourceError>(Some((group_items(page.items), next)))
            }
        });

        Ok(pages
            .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, SourceError>)))
            .try_flatten()
            .boxed())
    }
}

/// Folds the items of one page into records keyed by `(skuId, meterId)`.
///
/// Tiered meters come back as one item per tier; they share the product
/// and differ in `tierMinimumUnits`, which becomes `StartUsageAmount`.
fn group_items(items: Vec<RetailItem>) -> Vec<PriceRecord> {
    let mut records: BTreeMap<(String, String), PriceRecord> = BTreeMap::new();

    for item in items {
        let mut product_attrs = Attributes::new();
        product_attrs.insert("productId".to_string(), item.product_id);
        product_attrs.insert("productName".to_string(), item.product_name);
        product_attrs.insert("skuName".to_string(), item.sku_name);
        product_attrs.insert("meterName".to_string(), item.meter_name);
        if let Some(arm_sku) = item.arm_sku_name.filter(|s| !s.is_empty()) {
            product_attrs.insert("armSkuName".to_string(), arm_sku);
        }

        let mut price_attrs = Attributes::new();
        price_attrs.insert("type".to_string(), item.price_type);
        price_attrs.insert(
            "StartUsageAmount".to_string(),
            usage_bound(item.tier_minimum_units),
        );
        if let Some(term) = item.reservation_term {
            price_attrs.insert("reservationTerm".to_string(), term);
        }

        let key = (item.sku_id.clone(), item.meter_id.clone());
        let record = records.entry(key).or_insert_with(|| PriceRecord {
            product: NewProduct {
                provider: CloudProvider::Azure,
                sku: item.sku_id,
                meter_id: item.meter_id,
                location: item.arm_region_name,
                service: item.service_name,
                family: item.service_family,
                attributes: product_attrs,
            },
            prices: Vec::new(),
        });

        record.prices.push(NewPrice {
            currency: item.currency_code,
            unit: item.unit_of_measure,
            price: item.retail_price,
            attributes: price_attrs,
        });
    }

    records.into_values().collect()
}

fn odata_escape(value: &str) -> String {
    value.replace('\'', "''")
}
