//! PostgreSQL-backed catalog tests
//!
//! These run the real repositories against a throwaway container:
//! - idempotent upserts and referential integrity
//! - coarse product scans
//! - job status compare-and-set, one active job per scope, the stale job reaper
//! - ingestion followed by estimation, end to end

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use domain_pricing::*;
use futures::{StreamExt, stream};
use rust_decimal_macros::dec;
use test_utils::{TestDataBuilder, TestDatabase};
use tokio::sync::watch;

fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn instance_product(data: &TestDataBuilder, sku_suffix: &str, instance_type: &str) -> NewProduct {
    NewProduct {
        provider: CloudProvider::Aws,
        sku: data.sku(sku_suffix),
        meter_id: String::new(),
        location: data.location().to_string(),
        service: data.service("AmazonEC2"),
        family: "Compute Instance".to_string(),
        attributes: attrs(&[("InstanceType", instance_type), ("OperatingSystem", "Linux")]),
    }
}

fn on_demand(amount: rust_decimal::Decimal) -> NewPrice {
    NewPrice {
        currency: "USD".to_string(),
        unit: "Hrs".to_string(),
        price: amount,
        attributes: attrs(&[("TermType", "OnDemand")]),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upserts_are_idempotent() {
    let db = TestDatabase::new().await;
    let catalog = PgCatalogRepository::new(db.connection());
    let data = TestDataBuilder::from_test_name("test_upserts_are_idempotent");

    let first = catalog
        .upsert_product(instance_product(&data, "a", "m5.xlarge"))
        .await
        .unwrap();
    let second = catalog
        .upsert_product(instance_product(&data, "a", "m5.xlarge"))
        .await
        .unwrap();
    assert!(first.inserted);
    assert!(!second.inserted);
    assert_eq!(first.id, second.id);

    let price = catalog.upsert_price(first.id, on_demand(dec!(0.192))).await.unwrap();
    let again = catalog.upsert_price(first.id, on_demand(dec!(0.192))).await.unwrap();
    assert!(price.inserted);
    assert!(!again.inserted);
    assert_eq!(price.id, again.id);

    let prices = catalog.find_prices(first.id).await.unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].price, dec!(0.192));
    assert_eq!(prices[0].hash, on_demand(dec!(0.192)).fingerprint());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_prices_for_several_products_in_one_query() {
    let db = TestDatabase::new().await;
    let catalog = PgCatalogRepository::new(db.connection());
    let data = TestDataBuilder::from_test_name("test_prices_for_several_products_in_one_query");

    let a = catalog
        .upsert_product(instance_product(&data, "a", "m5.xlarge"))
        .await
        .unwrap();
    let b = catalog
        .upsert_product(instance_product(&data, "b", "m5.large"))
        .await
        .unwrap();
    let c = catalog
        .upsert_product(instance_product(&data, "c", "m5.2xlarge"))
        .await
        .unwrap();
    catalog.upsert_price(b.id, on_demand(dec!(0.096))).await.unwrap();
    catalog.upsert_price(a.id, on_demand(dec!(0.192))).await.unwrap();
    catalog.upsert_price(a.id, on_demand(dec!(0.200))).await.unwrap();
    catalog.upsert_price(c.id, on_demand(dec!(0.384))).await.unwrap();

    let prices = catalog.find_prices_for(&[b.id, a.id]).await.unwrap();
    let owners: Vec<i64> = prices.iter().map(|p| p.product_id).collect();
    assert_eq!(owners, vec![a.id, a.id, b.id]);
    assert!(prices[0].id < prices[1].id);

    assert!(catalog.find_prices_for(&[]).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_price_for_missing_product_is_rejected() {
    let db = TestDatabase::new().await;
    let catalog = PgCatalogRepository::new(db.connection());

    let err = catalog
        .upsert_price(987_654, on_demand(dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, PricingError::ProductNotFound(987_654)));
    assert!(err.is_store());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_find_products_filters_on_exact_columns() {
    let db = TestDatabase::new().await;
    let catalog = PgCatalogRepository::new(db.connection());
    let data = TestDataBuilder::from_test_name("test_find_products_filters_on_exact_columns");

    catalog
        .upsert_product(instance_product(&data, "a", "m5.xlarge"))
        .await
        .unwrap();
    catalog
        .upsert_product(instance_product(&data, "b", "m5.2xlarge"))
        .await
        .unwrap();
    let mut elsewhere = instance_product(&data, "c", "m5.xlarge");
    elsewhere.location = "sa-east-1".to_string();
    catalog.upsert_product(elsewhere).await.unwrap();

    let found = catalog
        .find_products(ProductQuery {
            provider: Some(CloudProvider::Aws),
            location: Some(data.location().to_string()),
            service: Some(data.service("AmazonEC2")),
            family: None,
        })
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert!(found[0].id < found[1].id);
    assert_eq!(found[0].attributes["InstanceType"], "m5.xlarge");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_job_transitions_are_compare_and_set() {
    let db = TestDatabase::new().await;
    let jobs = PgIngestionJobRepository::new(db.connection());
    let scope = IngestionScope::new(CloudProvider::Azure, "westeurope", "Virtual Machines");

    let job = jobs.create(&scope).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(jobs.find_active(&scope).await.unwrap().unwrap().id, job.id);

    let running = jobs
        .transition(job.id, JobStatus::Pending, JobStatus::Running, None)
        .await
        .unwrap();
    assert_eq!(running.status, JobStatus::Running);

    // a second writer that still believes the job is pending loses
    let lost = jobs
        .transition(job.id, JobStatus::Pending, JobStatus::Running, None)
        .await
        .unwrap_err();
    assert!(matches!(lost, PricingError::InvalidTransition { .. }));

    let done = jobs
        .transition(job.id, JobStatus::Running, JobStatus::Succeeded, None)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert!(jobs.find_active(&scope).await.unwrap().is_none());

    // terminal states are final
    let reopened = jobs
        .transition(job.id, JobStatus::Succeeded, JobStatus::Running, None)
        .await
        .unwrap_err();
    assert!(matches!(reopened, PricingError::InvalidTransition { .. }));

    let recent = jobs.list_recent(10).await.unwrap();
    assert_eq!(recent[0].id, job.id);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_second_active_job_on_scope_is_refused() {
    let db = TestDatabase::new().await;
    // two independent repositories stand in for two collector processes
    let first = PgIngestionJobRepository::new(db.connection());
    let second = PgIngestionJobRepository::new(db.connection());
    let scope = IngestionScope::new(CloudProvider::Aws, "eu-west-1", "AmazonEC2");

    let (a, b) = tokio::join!(first.create(&scope), second.create(&scope));
    let job = match (a, b) {
        (Ok(job), Err(err)) | (Err(err), Ok(job)) => {
            assert!(matches!(err, PricingError::ScopeBusy(_)));
            job
        }
        (a, b) => panic!("expected exactly one job, got {:?} and {:?}", a, b),
    };

    first
        .transition(job.id, JobStatus::Pending, JobStatus::Running, None)
        .await
        .unwrap();
    let err = second.create(&scope).await.unwrap_err();
    assert!(matches!(err, PricingError::ScopeBusy(_)));

    // other scopes are unaffected, and a closed scope can run again
    second
        .create(&IngestionScope::new(CloudProvider::Aws, "eu-west-1", "AmazonS3"))
        .await
        .unwrap();
    first
        .transition(job.id, JobStatus::Running, JobStatus::Succeeded, None)
        .await
        .unwrap();
    second.create(&scope).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_fail_stale_reaps_only_active_jobs() {
    let db = TestDatabase::new().await;
    let jobs = PgIngestionJobRepository::new(db.connection());

    let stuck = jobs
        .create(&IngestionScope::new(CloudProvider::Aws, "us-east-1", "AmazonEC2"))
        .await
        .unwrap();
    jobs.transition(stuck.id, JobStatus::Pending, JobStatus::Running, None)
        .await
        .unwrap();

    let finished = jobs
        .create(&IngestionScope::new(CloudProvider::Aws, "us-east-1", "AmazonS3"))
        .await
        .unwrap();
    jobs.transition(finished.id, JobStatus::Pending, JobStatus::Running, None)
        .await
        .unwrap();
    jobs.transition(finished.id, JobStatus::Running, JobStatus::Succeeded, None)
        .await
        .unwrap();

    let cutoff = Utc::now() + ChronoDuration::minutes(1);
    let reaped = jobs
        .fail_stale(cutoff, "reaped: exceeded 2h".to_string())
        .await
        .unwrap();

    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].id, stuck.id);

    let stuck = jobs.get_by_id(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Failed);
    assert_eq!(stuck.error_msg.as_deref(), Some("reaped: exceeded 2h"));

    let finished = jobs.get_by_id(finished.id).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Succeeded);
}

struct FixtureSource {
    records: Vec<PriceRecord>,
}

#[async_trait]
impl PricingSource for FixtureSource {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn open(&self, _scope: &IngestionScope) -> Result<RecordStream, SourceError> {
        let items: Vec<Result<PriceRecord, SourceError>> =
            self.records.iter().cloned().map(Ok).collect();
        Ok(stream::iter(items).boxed())
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_ingest_then_estimate() {
    let db = TestDatabase::new().await;
    let catalog = Arc::new(PgCatalogRepository::new(db.connection()));
    let jobs = Arc::new(PgIngestionJobRepository::new(db.connection()));
    let data = TestDataBuilder::from_test_name("test_ingest_then_estimate");

    let mut reserved = on_demand(dec!(0.120));
    reserved.attributes = attrs(&[("TermType", "Reserved")]);
    let records = vec![PriceRecord {
        product: instance_product(&data, "m5", "m5.xlarge"),
        prices: vec![on_demand(dec!(0.192)), reserved],
    }];

    let pipeline = IngestionPipeline::new(catalog.clone(), jobs.clone(), PipelineConfig::default())
        .with_source(Arc::new(FixtureSource { records }));
    let scope = IngestionScope::new(CloudProvider::Aws, data.location(), data.service("AmazonEC2"));
    let (_tx, shutdown) = watch::channel(false);

    let report = pipeline.ingest(scope.clone(), shutdown.clone()).await.unwrap();
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.products_inserted, 1);
    assert_eq!(report.prices_inserted, 2);

    let rerun = pipeline.ingest(scope, shutdown).await.unwrap();
    assert_eq!(rerun.products_skipped, 1);
    assert_eq!(rerun.prices_skipped, 2);

    let aggregator = CostAggregator::new(ResolutionEngine::new(catalog), EstimateConfig::default());
    let component = CostComponentRequest {
        name: "Instance usage (Linux/UNIX, on-demand, m5.xlarge)".to_string(),
        unit: "hours".to_string(),
        product_filter: ProductFilter {
            provider: Some(CloudProvider::Aws),
            location: Some(data.location().to_string()),
            service: Some(data.service("AmazonEC2")),
            attribute_filters: vec![AttributeFilter::eq("InstanceType", "m5.xlarge")],
            ..Default::default()
        },
        price_filter: PriceFilter {
            unit: Some("Hrs".to_string()),
            attribute_filters: vec![AttributeFilter::eq("TermType", "OnDemand")],
        },
        quantity: Quantity::Hourly(dec!(1)),
        tiers: None,
    };
    let resource = |name: &str| ResourceRequest {
        name: name.to_string(),
        resource_type: "aws_instance".to_string(),
        components: vec![component.clone()],
    };

    let estimate = aggregator
        .estimate(&[resource("aws_instance.web"), resource("aws_instance.worker")])
        .await
        .unwrap();

    assert_eq!(estimate.unpriced_components, 0);
    assert_eq!(estimate.resources[0].monthly_cost, dec!(140.16));
    assert_eq!(estimate.monthly_cost, dec!(280.32));
}
