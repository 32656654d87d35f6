use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use observability::{CatalogMetrics, ResolutionTimer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PricingResult;
use crate::filter::{FilterSet, PriceFilter, ProductFilter};
use crate::models::{Price, Product};
use crate::repository::CatalogRepository;

/// The single price chosen for a request, with the product it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub product: Product,
    pub price: Price,
}

/// Outcome of a resolution. Not finding a price is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Priced(ResolvedPrice),
    NotFound { reason: String },
}

impl Resolution {
    pub fn is_priced(&self) -> bool {
        matches!(self, Resolution::Priced(_))
    }

    pub fn priced(self) -> Option<ResolvedPrice> {
        match self {
            Resolution::Priced(resolved) => Some(resolved),
            Resolution::NotFound { .. } => None,
        }
    }
}

struct Candidate<'a> {
    product: &'a Product,
    price: Price,
    specificity: usize,
}

/// Resolves filter criteria to exactly one catalog price.
///
/// Stateless and read-only: safe to call concurrently from any number of
/// tasks against a shared catalog.
pub struct ResolutionEngine<C: CatalogRepository> {
    catalog: Arc<C>,
}

impl<C: CatalogRepository> Clone for ResolutionEngine<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<C: CatalogRepository> ResolutionEngine<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }

    /// Resolve a request to one price.
    ///
    /// Filters are validated and compiled before the catalog is touched; a
    /// malformed filter is returned as a configuration error. When several
    /// prices survive the filters the most specific one wins (most attribute
    /// dimensions beyond those the filters name), then the lowest price,
    /// then the lowest product id, then the lowest price id.
    pub async fn resolve(
        &self,
        product_filter: &ProductFilter,
        price_filter: &PriceFilter,
    ) -> PricingResult<Resolution> {
        let mut timer = ResolutionTimer::start();
        let result = self.resolve_inner(product_filter, price_filter).await;
        timer.stop();

        match &result {
            Ok(Resolution::Priced(_)) => {}
            Ok(Resolution::NotFound { reason }) => {
                warn!(
                    provider = ?product_filter.provider,
                    service = ?product_filter.service,
                    reason = %reason,
                    "No price found"
                );
            }
            Err(e) => {
                CatalogMetrics::record_resolution("error", 0);
                debug!(error = %e, "Resolution rejected");
            }
        }
        result
    }

    async fn resolve_inner(
        &self,
        product_filter: &ProductFilter,
        price_filter: &PriceFilter,
    ) -> PricingResult<Resolution> {
        product_filter.ensure_constrained()?;
        let product_set = FilterSet::compile(&product_filter.attribute_filters)?;
        let price_set = FilterSet::compile(&price_filter.attribute_filters)?;

        let scanned = self.catalog.find_products(product_filter.query()).await?;
        let products: Vec<Product> = scanned
            .into_iter()
            .filter(|p| product_set.matches(&p.attributes))
            .collect();

        if products.is_empty() {
            CatalogMetrics::record_resolution("not_found", 0);
            return Ok(Resolution::NotFound {
                reason: "no product matched the product filter".to_string(),
            });
        }

        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
        let survivors: HashMap<i64, (&Product, usize)> = products
            .iter()
            .map(|p| (p.id, (p, product_set.extra_dimensions(&p.attributes))))
            .collect();

        let mut candidates = Vec::new();
        for price in self.catalog.find_prices_for(&ids).await? {
            let Some(&(product, product_extra)) = survivors.get(&price.product_id) else {
                continue;
            };
            if price_filter
                .unit
                .as_deref()
                .is_some_and(|unit| unit != price.unit)
            {
                continue;
            }
            if !price_set.matches(&price.attributes) {
                continue;
            }
            let specificity = product_extra + price_set.extra_dimensions(&price.attributes);
            candidates.push(Candidate {
                product,
                price,
                specificity,
            });
        }

        let considered = candidates.len();
        let best = candidates.into_iter().min_by_key(|c| {
            (
                Reverse(c.specificity),
                c.price.price,
                c.product.id,
                c.price.id,
            )
        });

        match best {
            Some(candidate) => {
                CatalogMetrics::record_resolution("priced", considered);
                debug!(
                    product_id = candidate.product.id,
                    price_id = candidate.price.id,
                    candidates = considered,
                    "Resolved price"
                );
                Ok(Resolution::Priced(ResolvedPrice {
                    product: candidate.product.clone(),
                    price: candidate.price,
                }))
            }
            None => {
                CatalogMetrics::record_resolution("not_found", 0);
                Ok(Resolution::NotFound {
                    reason: format!(
                        "{} product(s) matched but none had a price matching the price filter",
                        products.len()
                    ),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PricingError;
    use crate::filter::AttributeFilter;
    use crate::models::{Attributes, CloudProvider};
    use crate::repository::MockCatalogRepository;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn product(id: i64, attributes: Attributes) -> Product {
        Product {
            id,
            provider: CloudProvider::Aws,
            sku: format!("SKU{}", id),
            meter_id: String::new(),
            location: "eu-west-1".to_string(),
            service: "AmazonEC2".to_string(),
            family: "Compute Instance".to_string(),
            attributes,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn price(id: i64, product_id: i64, unit: &str, amount: Decimal, attributes: Attributes) -> Price {
        Price {
            id,
            product_id,
            hash: format!("hash{}", id),
            currency: "USD".to_string(),
            unit: unit.to_string(),
            price: amount,
            attributes,
            created_at: Utc::now(),
        }
    }

    fn ec2_filter(instance_type: &str) -> ProductFilter {
        ProductFilter {
            provider: Some(CloudProvider::Aws),
            location: Some("eu-west-1".to_string()),
            service: Some("AmazonEC2".to_string()),
            attribute_filters: vec![AttributeFilter::eq("InstanceType", instance_type)],
            ..Default::default()
        }
    }

    fn on_demand() -> PriceFilter {
        PriceFilter {
            unit: Some("Hrs".to_string()),
            attribute_filters: vec![AttributeFilter::eq("TermType", "OnDemand")],
        }
    }

    #[tokio::test]
    async fn test_resolves_matching_price() {
        let mut mock_repo = MockCatalogRepository::new();

        mock_repo.expect_find_products().returning(|_| {
            Ok(vec![
                product(1, attrs(&[("InstanceType", "m5.xlarge"), ("Tenancy", "Shared")])),
                product(2, attrs(&[("InstanceType", "m5.large"), ("Tenancy", "Shared")])),
            ])
        });
        // only the product that survived attribute filtering is priced, in one call
        mock_repo
            .expect_find_prices_for()
            .withf(|ids| ids == [1])
            .times(1)
            .returning(|_| {
                Ok(vec![
                    price(10, 1, "Hrs", dec!(0.192), attrs(&[("TermType", "OnDemand")])),
                    price(11, 1, "Hrs", dec!(0.120), attrs(&[("TermType", "Reserved")])),
                ])
            });
        mock_repo.expect_find_prices().never();

        let engine = ResolutionEngine::new(Arc::new(mock_repo));
        let resolution = engine
            .resolve(&ec2_filter("m5.xlarge"), &on_demand())
            .await
            .unwrap();

        let resolved = resolution.priced().expect("should be priced");
        assert_eq!(resolved.product.id, 1);
        assert_eq!(resolved.price.id, 10);
        assert_eq!(resolved.price.price, dec!(0.192));
    }

    #[tokio::test]
    async fn test_no_product_is_not_found_not_error() {
        let mut mock_repo = MockCatalogRepository::new();
        mock_repo
            .expect_find_products()
            .returning(|_| Ok(vec![product(1, attrs(&[("InstanceType", "m5.large")]))]));
        mock_repo.expect_find_prices_for().never();

        let engine = ResolutionEngine::new(Arc::new(mock_repo));
        let resolution = engine
            .resolve(&ec2_filter("m5.xlarge"), &on_demand())
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_unit_mismatch_is_not_found() {
        let mut mock_repo = MockCatalogRepository::new();
        mock_repo
            .expect_find_products()
            .returning(|_| Ok(vec![product(1, attrs(&[("InstanceType", "m5.xlarge")]))]));
        mock_repo.expect_find_prices_for().returning(|_| {
            Ok(vec![price(10, 1, "GB-Mo", dec!(0.1), attrs(&[("TermType", "OnDemand")]))])
        });

        let engine = ResolutionEngine::new(Arc::new(mock_repo));
        let resolution = engine
            .resolve(&ec2_filter("m5.xlarge"), &on_demand())
            .await
            .unwrap();

        match resolution {
            Resolution::NotFound { reason } => assert!(reason.contains("1 product")),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_regex_fails_before_store_access() {
        let mut mock_repo = MockCatalogRepository::new();
        mock_repo.expect_find_products().never();

        let filter = ProductFilter {
            provider: Some(CloudProvider::Aws),
            attribute_filters: vec![AttributeFilter::regex("UsageType", "[unclosed")],
            ..Default::default()
        };

        let engine = ResolutionEngine::new(Arc::new(mock_repo));
        let err = engine
            .resolve(&filter, &PriceFilter::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PricingError::InvalidRegex { .. }));
    }

    #[tokio::test]
    async fn test_tie_break_prefers_specific_then_cheapest_then_lowest_id() {
        let mut mock_repo = MockCatalogRepository::new();
        mock_repo.expect_find_products().returning(|_| {
            Ok(vec![
                product(1, attrs(&[("InstanceType", "m5.xlarge")])),
                product(2, attrs(&[("InstanceType", "m5.xlarge")])),
            ])
        });
        mock_repo.expect_find_prices_for().returning(|_| {
            Ok(vec![
                price(
                    20,
                    2,
                    "Hrs",
                    dec!(0.50),
                    attrs(&[("TermType", "OnDemand"), ("StartUsageAmount", "0")]),
                ),
                price(10, 1, "Hrs", dec!(0.30), attrs(&[("TermType", "OnDemand")])),
                price(
                    11,
                    1,
                    "Hrs",
                    dec!(0.50),
                    attrs(&[("TermType", "OnDemand"), ("StartUsageAmount", "0")]),
                ),
            ])
        });

        let engine = ResolutionEngine::new(Arc::new(mock_repo));
        let resolved = engine
            .resolve(&ec2_filter("m5.xlarge"), &on_demand())
            .await
            .unwrap()
            .priced()
            .unwrap();

        // 11 and 20 both carry an extra dimension at the same price; product 1 wins
        assert_eq!(resolved.price.id, 11);
    }

    #[tokio::test]
    async fn test_prices_are_fetched_in_one_batch() {
        let mut mock_repo = MockCatalogRepository::new();
        mock_repo.expect_find_products().returning(|_| {
            Ok((1..=50)
                .map(|id| product(id, attrs(&[("InstanceType", "m5.xlarge")])))
                .collect())
        });
        mock_repo
            .expect_find_prices_for()
            .withf(|ids| ids.len() == 50)
            .times(1)
            .returning(|_| {
                Ok(vec![
                    price(500, 50, "Hrs", dec!(0.150), attrs(&[("TermType", "OnDemand")])),
                    // a row for a product outside the request is not a candidate
                    price(990, 99, "Hrs", dec!(0.001), attrs(&[("TermType", "OnDemand")])),
                    price(70, 7, "Hrs", dec!(0.150), attrs(&[("TermType", "OnDemand")])),
                ])
            });
        mock_repo.expect_find_prices().never();

        let engine = ResolutionEngine::new(Arc::new(mock_repo));
        let resolved = engine
            .resolve(&ec2_filter("m5.xlarge"), &on_demand())
            .await
            .unwrap()
            .priced()
            .unwrap();

        assert_eq!(resolved.product.id, 7);
        assert_eq!(resolved.price.id, 70);
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let mut mock_repo = MockCatalogRepository::new();
        mock_repo.expect_find_products().returning(|_| {
            Ok(vec![
                product(2, attrs(&[("InstanceType", "m5.xlarge")])),
                product(1, attrs(&[("InstanceType", "m5.xlarge")])),
            ])
        });
        mock_repo.expect_find_prices_for().returning(|ids| {
            Ok(ids
                .iter()
                .map(|&product_id| {
                    price(
                        product_id * 10,
                        product_id,
                        "Hrs",
                        dec!(0.192),
                        attrs(&[("TermType", "OnDemand")]),
                    )
                })
                .collect())
        });

        let engine = ResolutionEngine::new(Arc::new(mock_repo));
        let mut chosen = Vec::new();
        for _ in 0..3 {
            let resolved = engine
                .resolve(&ec2_filter("m5.xlarge"), &on_demand())
                .await
                .unwrap()
                .priced()
                .unwrap();
            chosen.push(resolved.price.id);
        }

        assert_eq!(chosen, vec![10, 10, 10]);
    }
}
