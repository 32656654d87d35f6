//! Seam for the per-resource-kind request builders.
//!
//! Each resource kind (an EC2 instance, a NAT gateway, a storage bucket, ...)
//! knows how to turn its parsed attributes into cost component requests.
//! Concrete producers live outside this crate; the registry picks one by
//! resource type.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::aggregator::{CostComponentRequest, ResourceRequest};
use crate::error::PricingResult;

/// Translates one parsed infrastructure resource into cost component requests
pub trait ComponentProducer: Send + Sync {
    /// Resource type handled, e.g. `aws_instance`
    fn resource_type(&self) -> &str;

    fn produce_components(
        &self,
        attributes: &serde_json::Map<String, Value>,
    ) -> PricingResult<Vec<CostComponentRequest>>;
}

/// Type-keyed lookup of producers
#[derive(Default, Clone)]
pub struct ProducerRegistry {
    producers: HashMap<String, Arc<dyn ComponentProducer>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer, replacing any previous one for the same type
    pub fn register(&mut self, producer: Arc<dyn ComponentProducer>) {
        self.producers
            .insert(producer.resource_type().to_string(), producer);
    }

    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn ComponentProducer>> {
        self.producers.get(resource_type)
    }

    pub fn supports(&self, resource_type: &str) -> bool {
        self.producers.contains_key(resource_type)
    }

    /// Builds the resource request, or `None` when no producer knows the type
    pub fn produce(
        &self,
        name: &str,
        resource_type: &str,
        attributes: &serde_json::Map<String, Value>,
    ) -> PricingResult<Option<ResourceRequest>> {
        let Some(producer) = self.get(resource_type) else {
            tracing::debug!(resource_type, "No producer registered, skipping resource");
            return Ok(None);
        };

        Ok(Some(ResourceRequest {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            components: producer.produce_components(attributes)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Quantity;
    use crate::error::PricingError;
    use crate::filter::{AttributeFilter, PriceFilter, ProductFilter};
    use crate::models::CloudProvider;
    use rust_decimal_macros::dec;

    struct InstanceProducer;

    impl ComponentProducer for InstanceProducer {
        fn resource_type(&self) -> &str {
            "aws_instance"
        }

        fn produce_components(
            &self,
            attributes: &serde_json::Map<String, Value>,
        ) -> PricingResult<Vec<CostComponentRequest>> {
            let instance_type = attributes
                .get("instance_type")
                .and_then(Value::as_str)
                .ok_or_else(|| PricingError::Configuration("instance_type is required".into()))?;

            Ok(vec![CostComponentRequest {
                name: format!("Instance usage (Linux/UNIX, on-demand, {})", instance_type),
                unit: "hours".to_string(),
                product_filter: ProductFilter {
                    provider: Some(CloudProvider::Aws),
                    service: Some("AmazonEC2".to_string()),
                    attribute_filters: vec![AttributeFilter::eq("InstanceType", instance_type)],
                    ..Default::default()
                },
                price_filter: PriceFilter::default(),
                quantity: Quantity::Hourly(dec!(1)),
                tiers: None,
            }])
        }
    }

    fn registry() -> ProducerRegistry {
        let mut registry = ProducerRegistry::new();
        registry.register(Arc::new(InstanceProducer));
        registry
    }

    #[test]
    fn test_produce_known_type() {
        let attrs = serde_json::json!({"instance_type": "m5.xlarge"});
        let request = registry()
            .produce("aws_instance.web", "aws_instance", attrs.as_object().unwrap())
            .unwrap()
            .unwrap();

        assert_eq!(request.components.len(), 1);
        assert_eq!(request.resource_type, "aws_instance");
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let attrs = serde_json::Map::new();
        let result = registry().produce("x", "aws_unknown", &attrs).unwrap();
        assert!(result.is_none());
        assert!(!registry().supports("aws_unknown"));
    }

    #[test]
    fn test_producer_errors_propagate() {
        let attrs = serde_json::Map::new();
        let err = registry()
            .produce("aws_instance.web", "aws_instance", &attrs)
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
