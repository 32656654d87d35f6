//! Attribute filter matching.
//!
//! Filters arrive from upstream producers as plain data ([`AttributeFilter`],
//! [`ProductFilter`], [`PriceFilter`]) and are compiled into a [`FilterSet`]
//! before any catalog access, so a malformed regex fails the request up
//! front instead of silently matching nothing.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{PricingError, PricingResult};
use crate::models::{Attributes, CloudProvider, ProductQuery};

/// Single key plus exact-value-or-regex criterion.
///
/// Exactly one of `value` / `value_regex` must be set. A regex matches the
/// whole attribute value and may be written as `/pattern/` or `/pattern/i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_regex: Option<String>,
}

impl AttributeFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            value_regex: None,
        }
    }

    pub fn regex(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            value_regex: Some(pattern.into()),
        }
    }
}

/// Product-side criteria. Unset exact fields leave the column unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    #[serde(default)]
    pub provider: Option<CloudProvider>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilter>,
}

impl ProductFilter {
    /// Exact-match part used for the coarse catalog scan
    pub fn query(&self) -> ProductQuery {
        ProductQuery {
            provider: self.provider,
            location: self.location.clone(),
            service: self.service.clone(),
            family: self.family.clone(),
        }
    }

    /// Rejects a filter that constrains nothing at all
    pub fn ensure_constrained(&self) -> PricingResult<()> {
        if self.query().is_unconstrained() && self.attribute_filters.is_empty() {
            return Err(PricingError::Configuration(
                "product filter constrains nothing; set provider, location, service, family or an attribute filter"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Price-side criteria applied to each candidate product's prices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFilter {
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilter>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
}

/// An [`AttributeFilter`] ready to be evaluated
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    key: String,
    matcher: Matcher,
}

impl CompiledFilter {
    pub fn compile(filter: &AttributeFilter) -> PricingResult<Self> {
        let key = filter.key.trim();
        if key.is_empty() {
            return Err(PricingError::Configuration(
                "attribute filter has an empty key".to_string(),
            ));
        }

        let matcher = match (&filter.value, &filter.value_regex) {
            (Some(value), None) => Matcher::Exact(value.clone()),
            (None, Some(pattern)) => Matcher::Pattern(compile_pattern(key, pattern)?),
            (Some(_), Some(_)) => {
                return Err(PricingError::Configuration(format!(
                    "attribute filter '{}' sets both value and value_regex",
                    key
                )));
            }
            (None, None) => {
                return Err(PricingError::Configuration(format!(
                    "attribute filter '{}' sets neither value nor value_regex",
                    key
                )));
            }
        };

        Ok(Self {
            key: key.to_string(),
            matcher,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Absent key never matches
    pub fn matches(&self, attributes: &Attributes) -> bool {
        let Some(actual) = attributes.get(&self.key) else {
            return false;
        };
        match &self.matcher {
            Matcher::Exact(expected) => actual == expected,
            Matcher::Pattern(re) => re.is_match(actual),
        }
    }
}

/// Splits `/body/` and `/body/i`; anything else is a bare pattern
fn split_delimited(pattern: &str) -> (&str, bool) {
    if let Some(rest) = pattern.strip_prefix('/') {
        if let Some(body) = rest.strip_suffix("/i") {
            return (body, true);
        }
        if let Some(body) = rest.strip_suffix('/') {
            return (body, false);
        }
    }
    (pattern, false)
}

fn compile_pattern(key: &str, pattern: &str) -> PricingResult<Regex> {
    let (body, case_insensitive) = split_delimited(pattern);
    RegexBuilder::new(&format!("^(?:{})$", body))
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|source| PricingError::InvalidRegex {
            key: key.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}

/// AND of compiled attribute filters
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<CompiledFilter>,
}

impl FilterSet {
    pub fn compile(filters: &[AttributeFilter]) -> PricingResult<Self> {
        let filters = filters
            .iter()
            .map(CompiledFilter::compile)
            .collect::<PricingResult<Vec<_>>>()?;
        Ok(Self { filters })
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.filters.iter().all(|f| f.matches(attributes))
    }

    /// Number of attribute keys in `attributes` that no filter names
    pub fn extra_dimensions(&self, attributes: &Attributes) -> usize {
        attributes
            .keys()
            .filter(|k| !self.filters.iter().any(|f| f.key() == k.as_str()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_value_match() {
        let product = attrs(&[("InstanceType", "m5.xlarge"), ("Tenancy", "Shared")]);

        let hit = CompiledFilter::compile(&AttributeFilter::eq("InstanceType", "m5.xlarge")).unwrap();
        let miss = CompiledFilter::compile(&AttributeFilter::eq("InstanceType", "m5.large")).unwrap();

        assert!(hit.matches(&product));
        assert!(!miss.matches(&product));
    }

    #[test]
    fn test_regex_match_is_anchored() {
        let filter =
            CompiledFilter::compile(&AttributeFilter::regex("UsageType", ".*NatGateway-Hours"))
                .unwrap();

        assert!(filter.matches(&attrs(&[("UsageType", "USE1-NatGateway-Hours")])));
        assert!(!filter.matches(&attrs(&[("UsageType", "USE1-NatGateway-Bytes")])));
        assert!(!filter.matches(&attrs(&[("UsageType", "USE1-NatGateway-Hours-Extra")])));
    }

    #[test]
    fn test_delimited_regex_with_case_flag() {
        let filter =
            CompiledFilter::compile(&AttributeFilter::regex("OperatingSystem", "/linux/i")).unwrap();
        assert!(filter.matches(&attrs(&[("OperatingSystem", "Linux")])));

        let strict =
            CompiledFilter::compile(&AttributeFilter::regex("OperatingSystem", "/linux/")).unwrap();
        assert!(!strict.matches(&attrs(&[("OperatingSystem", "Linux")])));
    }

    #[test]
    fn test_absent_key_fails() {
        let filter = CompiledFilter::compile(&AttributeFilter::eq("Tenancy", "Shared")).unwrap();
        assert!(!filter.matches(&attrs(&[("InstanceType", "m5.xlarge")])));
    }

    #[test]
    fn test_malformed_regex_is_configuration_error() {
        let err = CompiledFilter::compile(&AttributeFilter::regex("UsageType", "(unclosed"))
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidRegex { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_value_xor_regex() {
        let both = AttributeFilter {
            key: "k".into(),
            value: Some("a".into()),
            value_regex: Some("a".into()),
        };
        let neither = AttributeFilter {
            key: "k".into(),
            ..Default::default()
        };
        let empty_key = AttributeFilter::eq("  ", "a");

        for filter in [both, neither, empty_key] {
            let err = CompiledFilter::compile(&filter).unwrap_err();
            assert!(matches!(err, PricingError::Configuration(_)));
        }
    }

    #[test]
    fn test_filter_set_ands_filters() {
        let set = FilterSet::compile(&[
            AttributeFilter::eq("InstanceType", "m5.xlarge"),
            AttributeFilter::regex("Tenancy", "Shared|Default"),
        ])
        .unwrap();

        assert!(set.matches(&attrs(&[("InstanceType", "m5.xlarge"), ("Tenancy", "Shared")])));
        assert!(!set.matches(&attrs(&[("InstanceType", "m5.xlarge"), ("Tenancy", "Dedicated")])));
        assert!(FilterSet::default().matches(&Attributes::new()));
    }

    #[test]
    fn test_extra_dimensions_counts_unnamed_keys() {
        let set = FilterSet::compile(&[AttributeFilter::eq("TermType", "OnDemand")]).unwrap();
        let price = attrs(&[("TermType", "OnDemand"), ("StartUsageAmount", "0")]);
        assert_eq!(set.extra_dimensions(&price), 1);
    }

    #[test]
    fn test_unconstrained_product_filter_rejected() {
        let err = ProductFilter::default().ensure_constrained().unwrap_err();
        assert!(err.is_configuration());

        let by_provider = ProductFilter {
            provider: Some(CloudProvider::Aws),
            ..Default::default()
        };
        assert!(by_provider.ensure_constrained().is_ok());
    }

    #[test]
    fn test_deserialize_filter_from_request_json() {
        let json = r#"{
            "provider": "aws",
            "service": "AmazonEC2",
            "attribute_filters": [
                {"key": "InstanceType", "value": "m5.xlarge"},
                {"key": "UsageType", "value_regex": "/.*BoxUsage.*/i"}
            ]
        }"#;
        let filter: ProductFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.provider, Some(CloudProvider::Aws));
        assert_eq!(filter.attribute_filters.len(), 2);
        assert!(FilterSet::compile(&filter.attribute_filters).is_ok());
    }
}
