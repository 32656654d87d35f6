//! Cost aggregation: resolved unit price × quantity, rolled up per resource
//! and per submission.
//!
//! No currency conversion happens here. A price whose currency differs from
//! the reporting currency leaves the component unpriced with a reason.

use futures::future::try_join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PricingError, PricingResult};
use crate::filter::{AttributeFilter, PriceFilter, ProductFilter};
use crate::repository::CatalogRepository;
use crate::resolver::{Resolution, ResolutionEngine, ResolvedPrice};
use crate::tiers::{calculate_tier_buckets, tier_lower_bounds};

/// Hours in a billing month
pub const HOURS_PER_MONTH: Decimal = dec!(730);

/// Price attribute holding the lower bound of a graduated pricing tier
pub const START_USAGE_ATTRIBUTE: &str = "StartUsageAmount";

/// Usage of one cost component: hourly or monthly, never both.
///
/// Serialised as `{"hourly_quantity": ..}` or `{"monthly_quantity": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuantity", into = "RawQuantity")]
pub enum Quantity {
    Hourly(Decimal),
    Monthly(Decimal),
}

/// Wire shape of [`Quantity`]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RawQuantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_quantity: Option<Decimal>,
}

impl TryFrom<RawQuantity> for Quantity {
    type Error = PricingError;

    fn try_from(raw: RawQuantity) -> Result<Self, Self::Error> {
        Quantity::from_parts(raw.hourly_quantity, raw.monthly_quantity)
    }
}

impl From<Quantity> for RawQuantity {
    fn from(quantity: Quantity) -> Self {
        match quantity {
            Quantity::Hourly(q) => RawQuantity {
                hourly_quantity: Some(q),
                monthly_quantity: None,
            },
            Quantity::Monthly(q) => RawQuantity {
                hourly_quantity: None,
                monthly_quantity: Some(q),
            },
        }
    }
}

impl Quantity {
    /// Builds a quantity from the two optional request fields
    pub fn from_parts(hourly: Option<Decimal>, monthly: Option<Decimal>) -> PricingResult<Self> {
        let quantity = match (hourly, monthly) {
            (Some(h), None) => Quantity::Hourly(h),
            (None, Some(m)) => Quantity::Monthly(m),
            (Some(_), Some(_)) => {
                return Err(PricingError::Configuration(
                    "set exactly one of hourly_quantity and monthly_quantity, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(PricingError::Configuration(
                    "one of hourly_quantity or monthly_quantity is required".to_string(),
                ));
            }
        };

        if quantity.raw().is_sign_negative() && !quantity.raw().is_zero() {
            return Err(PricingError::Configuration(format!(
                "quantity must be non-negative, got {}",
                quantity.raw()
            )));
        }
        quantity.monthly_units()?;
        Ok(quantity)
    }

    fn raw(&self) -> Decimal {
        match self {
            Quantity::Hourly(q) | Quantity::Monthly(q) => *q,
        }
    }

    /// Units consumed per month; fails when an hourly quantity is too large
    /// to express per month
    pub fn monthly_units(&self) -> PricingResult<Decimal> {
        match self {
            Quantity::Hourly(q) => q.checked_mul(HOURS_PER_MONTH).ok_or_else(|| {
                PricingError::Configuration(format!(
                    "hourly_quantity {} is out of range for a monthly total",
                    q
                ))
            }),
            Quantity::Monthly(q) => Ok(*q),
        }
    }

    /// Units consumed per hour
    pub fn hourly_units(&self) -> Decimal {
        match self {
            Quantity::Hourly(q) => *q,
            Quantity::Monthly(q) => *q / HOURS_PER_MONTH,
        }
    }
}

/// Graduated pricing: the monthly quantity is split over cumulative tier
/// thresholds and each bucket is priced at its own tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieredUsage {
    pub tier_limits: Vec<Decimal>,
}

/// One billable dimension of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostComponentRequest {
    pub name: String,
    /// Display unit, e.g. `hours` or `GB`
    pub unit: String,
    pub product_filter: ProductFilter,
    #[serde(default)]
    pub price_filter: PriceFilter,
    #[serde(flatten)]
    pub quantity: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<TieredUsage>,
}

/// A resource with the components an upstream producer derived for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub name: String,
    pub resource_type: String,
    pub components: Vec<CostComponentRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CostStatus {
    Priced,
    NotPriced { reason: String },
}

/// Cost of one tier bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCost {
    pub start_usage: Decimal,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub price_id: i64,
    pub monthly_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCost {
    pub name: String,
    pub unit: String,
    pub hourly_quantity: Decimal,
    pub monthly_quantity: Decimal,
    /// `None` when unpriced or tiered (see `tiers`)
    pub unit_price: Option<Decimal>,
    pub price_id: Option<i64>,
    pub hourly_cost: Decimal,
    pub monthly_cost: Decimal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<TierCost>,
    #[serde(flatten)]
    pub status: CostStatus,
}

impl ComponentCost {
    fn unpriced(request: &CostComponentRequest, monthly_units: Decimal, reason: String) -> Self {
        Self {
            name: request.name.clone(),
            unit: request.unit.clone(),
            hourly_quantity: request.quantity.hourly_units(),
            monthly_quantity: monthly_units,
            unit_price: None,
            price_id: None,
            hourly_cost: Decimal::ZERO,
            monthly_cost: Decimal::ZERO,
            tiers: Vec::new(),
            status: CostStatus::NotPriced { reason },
        }
    }

    pub fn is_priced(&self) -> bool {
        self.status == CostStatus::Priced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCost {
    pub name: String,
    pub resource_type: String,
    pub components: Vec<ComponentCost>,
    pub hourly_cost: Decimal,
    pub monthly_cost: Decimal,
    pub unpriced_components: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateReport {
    pub currency: String,
    pub resources: Vec<ResourceCost>,
    pub hourly_cost: Decimal,
    pub monthly_cost: Decimal,
    pub unpriced_components: usize,
}

/// Estimation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateConfig {
    /// Catalog currency every price must already be in
    pub reporting_currency: String,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            reporting_currency: "USD".to_string(),
        }
    }
}

/// Turns cost component requests into priced totals
pub struct CostAggregator<C: CatalogRepository> {
    engine: ResolutionEngine<C>,
    config: EstimateConfig,
}

impl<C: CatalogRepository> CostAggregator<C> {
    pub fn new(engine: ResolutionEngine<C>, config: EstimateConfig) -> Self {
        Self { engine, config }
    }

    /// Price one component.
    ///
    /// A missing price yields a zero-cost `NotPriced` component; malformed
    /// filters, out-of-range totals and store failures are returned as errors.
    pub async fn estimate_component(
        &self,
        request: &CostComponentRequest,
    ) -> PricingResult<ComponentCost> {
        let monthly_units = request.quantity.monthly_units()?;
        match &request.tiers {
            Some(tiers) => self.estimate_tiered(request, monthly_units, tiers).await,
            None => self.estimate_flat(request, monthly_units).await,
        }
    }

    async fn estimate_flat(
        &self,
        request: &CostComponentRequest,
        monthly_units: Decimal,
    ) -> PricingResult<ComponentCost> {
        let resolved = match self
            .engine
            .resolve(&request.product_filter, &request.price_filter)
            .await?
        {
            Resolution::Priced(resolved) => resolved,
            Resolution::NotFound { reason } => {
                return Ok(ComponentCost::unpriced(request, monthly_units, reason));
            }
        };

        if let Some(reason) = self.currency_mismatch(&resolved) {
            warn!(component = %request.name, reason = %reason, "Skipping price");
            return Ok(ComponentCost::unpriced(request, monthly_units, reason));
        }

        let unit_price = resolved.price.price;
        let hourly_units = request.quantity.hourly_units();
        Ok(ComponentCost {
            name: request.name.clone(),
            unit: request.unit.clone(),
            hourly_quantity: hourly_units,
            monthly_quantity: monthly_units,
            unit_price: Some(unit_price),
            price_id: Some(resolved.price.id),
            hourly_cost: cost(&request.name, unit_price, hourly_units)?,
            monthly_cost: cost(&request.name, unit_price, monthly_units)?,
            tiers: Vec::new(),
            status: CostStatus::Priced,
        })
    }

    async fn estimate_tiered(
        &self,
        request: &CostComponentRequest,
        monthly_units: Decimal,
        tiers: &TieredUsage,
    ) -> PricingResult<ComponentCost> {
        let buckets = calculate_tier_buckets(monthly_units, &tiers.tier_limits)?;
        let bounds = tier_lower_bounds(&tiers.tier_limits);

        let mut tier_costs = Vec::new();
        for (i, (&quantity, &start_usage)) in buckets.iter().zip(bounds.iter()).enumerate() {
            // the first tier is always resolved so a zero quantity still shows its price
            if quantity.is_zero() && i > 0 {
                continue;
            }

            let price_filter = with_start_usage(&request.price_filter, start_usage);
            let resolved = match self
                .engine
                .resolve(&request.product_filter, &price_filter)
                .await?
            {
                Resolution::Priced(resolved) => resolved,
                Resolution::NotFound { reason } => {
                    return Ok(ComponentCost::unpriced(
                        request,
                        monthly_units,
                        format!("tier starting at {}: {}", start_usage, reason),
                    ));
                }
            };

            if let Some(reason) = self.currency_mismatch(&resolved) {
                warn!(component = %request.name, reason = %reason, "Skipping tier price");
                return Ok(ComponentCost::unpriced(request, monthly_units, reason));
            }

            tier_costs.push(TierCost {
                start_usage,
                quantity,
                unit_price: resolved.price.price,
                price_id: resolved.price.id,
                monthly_cost: cost(&request.name, resolved.price.price, quantity)?,
            });
        }

        let monthly_cost = total(&request.name, tier_costs.iter().map(|t| t.monthly_cost))?;
        Ok(ComponentCost {
            name: request.name.clone(),
            unit: request.unit.clone(),
            hourly_quantity: request.quantity.hourly_units(),
            monthly_quantity: monthly_units,
            unit_price: None,
            price_id: None,
            hourly_cost: monthly_cost / HOURS_PER_MONTH,
            monthly_cost,
            tiers: tier_costs,
            status: CostStatus::Priced,
        })
    }

    fn currency_mismatch(&self, resolved: &ResolvedPrice) -> Option<String> {
        let currency = &resolved.price.currency;
        if currency.eq_ignore_ascii_case(&self.config.reporting_currency) {
            None
        } else {
            Some(format!(
                "price {} is in {}, reporting currency is {}",
                resolved.price.id, currency, self.config.reporting_currency
            ))
        }
    }

    /// Price every component of a resource and total them
    pub async fn estimate_resource(&self, resource: &ResourceRequest) -> PricingResult<ResourceCost> {
        let components = try_join_all(
            resource
                .components
                .iter()
                .map(|component| self.estimate_component(component)),
        )
        .await?;

        let hourly_cost = total(&resource.name, components.iter().map(|c| c.hourly_cost))?;
        let monthly_cost = total(&resource.name, components.iter().map(|c| c.monthly_cost))?;
        let unpriced_components = components.iter().filter(|c| !c.is_priced()).count();

        Ok(ResourceCost {
            name: resource.name.clone(),
            resource_type: resource.resource_type.clone(),
            components,
            hourly_cost,
            monthly_cost,
            unpriced_components,
        })
    }

    /// Price a whole submission
    pub async fn estimate(&self, resources: &[ResourceRequest]) -> PricingResult<EstimateReport> {
        let mut costs = Vec::with_capacity(resources.len());
        for resource in resources {
            costs.push(self.estimate_resource(resource).await?);
        }

        let hourly_cost = total("estimate", costs.iter().map(|r| r.hourly_cost))?;
        let monthly_cost = total("estimate", costs.iter().map(|r| r.monthly_cost))?;
        let unpriced_components = costs.iter().map(|r| r.unpriced_components).sum();

        Ok(EstimateReport {
            currency: self.config.reporting_currency.clone(),
            resources: costs,
            hourly_cost,
            monthly_cost,
            unpriced_components,
        })
    }
}

fn cost(name: &str, unit_price: Decimal, quantity: Decimal) -> PricingResult<Decimal> {
    unit_price.checked_mul(quantity).ok_or_else(|| {
        PricingError::Configuration(format!(
            "cost of {} overflows: {} × {}",
            name, unit_price, quantity
        ))
    })
}

fn total(name: &str, mut amounts: impl Iterator<Item = Decimal>) -> PricingResult<Decimal> {
    amounts
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| PricingError::Configuration(format!("total cost of {} overflows", name)))
}

fn with_start_usage(filter: &PriceFilter, start_usage: Decimal) -> PriceFilter {
    let mut filter = filter.clone();
    filter
        .attribute_filters
        .retain(|f| f.key != START_USAGE_ATTRIBUTE);
    filter.attribute_filters.push(AttributeFilter::eq(
        START_USAGE_ATTRIBUTE,
        start_usage.normalize().to_string(),
    ));
    filter
}
