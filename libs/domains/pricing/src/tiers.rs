//! Tier bucket calculator for graduated pricing.
//!
//! Tier limits are CUMULATIVE thresholds measured from zero: `[10, 50]`
//! means tier 0 covers `0..10`, tier 1 covers `10..50` and the overflow
//! bucket covers everything above 50. Per-band widths are not accepted;
//! a caller holding widths must accumulate them first.

use rust_decimal::Decimal;

use crate::error::{PricingError, PricingResult};

/// Splits `quantity` across the tiers bounded by `tier_limits`.
///
/// The result has `tier_limits.len() + 1` non-negative entries summing to
/// `quantity`; the last entry is the overflow above the final threshold.
pub fn calculate_tier_buckets(
    quantity: Decimal,
    tier_limits: &[Decimal],
) -> PricingResult<Vec<Decimal>> {
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(PricingError::Configuration(format!(
            "tiered quantity must be non-negative, got {}",
            quantity
        )));
    }
    validate_limits(tier_limits)?;

    let mut buckets = Vec::with_capacity(tier_limits.len() + 1);
    let mut remaining = quantity;
    let mut lower = Decimal::ZERO;

    for &limit in tier_limits {
        let width = limit - lower;
        let allocated = remaining.min(width);
        buckets.push(allocated);
        remaining -= allocated;
        lower = limit;
    }
    buckets.push(remaining);

    Ok(buckets)
}

/// Lower bound of every bucket produced for `tier_limits`: `[0, L0, L1, ...]`
pub fn tier_lower_bounds(tier_limits: &[Decimal]) -> Vec<Decimal> {
    std::iter::once(Decimal::ZERO)
        .chain(tier_limits.iter().copied())
        .collect()
}

fn validate_limits(tier_limits: &[Decimal]) -> PricingResult<()> {
    let mut previous = Decimal::ZERO;
    for (i, &limit) in tier_limits.iter().enumerate() {
        if limit <= previous {
            return Err(PricingError::Configuration(format!(
                "tier limits must be positive and strictly ascending cumulative thresholds; limit {} ({}) does not exceed {}",
                i, limit, previous
            )));
        }
        previous = limit;
    }
    Ok(())
}
