//! Runs ingestion jobs for a set of scopes, once or on a cron schedule.

use std::collections::BTreeSet;
use std::sync::Arc;

use domain_pricing::{
    CatalogRepository, IngestionJob, IngestionJobRepository, IngestionPipeline, IngestionScope,
    PricingError, PricingResult,
};
use eyre::Result;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Outcome of one pass over a set of scopes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Scopes skipped because another job held them
    pub busy: usize,
    /// Scopes for which no job could be started
    pub errors: usize,
    pub products_inserted: u64,
    pub prices_inserted: u64,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

pub struct Collector<C: CatalogRepository, J: IngestionJobRepository> {
    pipeline: Arc<IngestionPipeline<C, J>>,
}

impl<C: CatalogRepository, J: IngestionJobRepository> Clone for Collector<C, J> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
        }
    }
}

impl<C, J> Collector<C, J>
where
    C: CatalogRepository + 'static,
    J: IngestionJobRepository + 'static,
{
    pub fn new(pipeline: IngestionPipeline<C, J>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Ingest every distinct scope concurrently; one job per scope.
    pub async fn ingest_all(
        &self,
        scopes: Vec<IngestionScope>,
        shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let scopes: BTreeSet<IngestionScope> = scopes.into_iter().collect();
        info!(scopes = scopes.len(), "Starting ingestion run");

        let runs = scopes.into_iter().map(|scope| {
            let pipeline = self.pipeline.clone();
            let shutdown = shutdown.clone();
            async move {
                let result = pipeline.ingest(scope.clone(), shutdown).await;
                (scope, result)
            }
        });

        let mut summary = RunSummary::default();
        for (scope, result) in join_all(runs).await {
            match result {
                Ok(report) if report.is_success() => {
                    summary.succeeded += 1;
                    summary.products_inserted += report.products_inserted;
                    summary.prices_inserted += report.prices_inserted;
                }
                Ok(report) => {
                    summary.failed += 1;
                    summary.products_inserted += report.products_inserted;
                    summary.prices_inserted += report.prices_inserted;
                    if let Some(e) = &report.error {
                        warn!(scope = %scope, job_id = %report.job_id, error = %e, "Ingestion job failed");
                    }
                }
                Err(PricingError::ScopeBusy(_)) => {
                    summary.busy += 1;
                    info!(scope = %scope, "Scope busy, skipped");
                }
                Err(e) => {
                    summary.errors += 1;
                    error!(scope = %scope, error = %e, "Could not start ingestion job");
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            busy = summary.busy,
            errors = summary.errors,
            "Ingestion run complete"
        );
        summary
    }

    /// Fail jobs left pending or running by a crashed process
    pub async fn reap(&self) -> PricingResult<Vec<IngestionJob>> {
        self.pipeline.reap_stale_jobs().await
    }

    pub async fn recent_jobs(&self, limit: u64) -> PricingResult<Vec<IngestionJob>> {
        self.pipeline.recent_jobs(limit).await
    }

    /// Reap, then ingest `scopes`, on every tick of `cron_expr` until shutdown.
    pub async fn run_scheduled(
        &self,
        cron_expr: &str,
        scopes: Vec<IngestionScope>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(cron = cron_expr, scopes = scopes.len(), "Starting scheduled ingestion");

        let mut sched = JobScheduler::new().await?;

        let collector = self.clone();
        let tick_shutdown = shutdown.clone();
        let job = Job::new_async(cron_expr, move |_uuid, _l| {
            let collector = collector.clone();
            let scopes = scopes.clone();
            let shutdown = tick_shutdown.clone();

            Box::pin(async move {
                if let Err(e) = collector.reap().await {
                    error!(error = %e, "Reaper failed");
                }
                collector.ingest_all(scopes, shutdown).await;
            })
        })?;

        sched.add(job).await?;
        sched.start().await?;
        info!("Scheduler started, waiting for ticks");

        let mut shutdown = shutdown;
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("Shutdown requested, stopping scheduler");
        sched.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::JsonLinesSource;
    use domain_pricing::{
        CloudProvider, InMemoryCatalog, InMemoryJobStore, JobStatus, PipelineConfig,
    };
    use std::path::PathBuf;
    use std::time::Duration;

    const RECORD: &str = r#"{"product": {"provider": "aws", "sku": "SKU1", "location": "us-east-1", "service": "AmazonEC2", "attributes": {"InstanceType": "t3.micro"}}, "prices": [{"currency": "USD", "unit": "Hrs", "price": "0.0104", "attributes": {"TermType": "OnDemand"}}]}"#;

    fn fixture_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("collector-{}-{}", test, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("aws-us-east-1-AmazonEC2.jsonl"), RECORD).unwrap();
        dir
    }

    fn collector(
        dir: PathBuf,
        config: PipelineConfig,
    ) -> (Collector<InMemoryCatalog, InMemoryJobStore>, InMemoryCatalog, InMemoryJobStore) {
        let catalog = InMemoryCatalog::new();
        let jobs = InMemoryJobStore::new();
        let pipeline = IngestionPipeline::new(Arc::new(catalog.clone()), Arc::new(jobs.clone()), config)
            .with_source(Arc::new(JsonLinesSource::new(CloudProvider::Aws, dir)));
        (Collector::new(pipeline), catalog, jobs)
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn test_ingest_all_dedups_and_summarises() {
        let (collector, catalog, _jobs) = collector(fixture_dir("summary"), PipelineConfig::default());
        let ec2 = IngestionScope::new(CloudProvider::Aws, "us-east-1", "AmazonEC2");

        let summary = collector
            .ingest_all(
                vec![
                    ec2.clone(),
                    ec2.clone(),
                    IngestionScope::new(CloudProvider::Aws, "us-east-1", "AmazonRDS"),
                    IngestionScope::new(CloudProvider::Azure, "eastus", "Storage"),
                ],
                no_shutdown(),
            )
            .await;

        assert_eq!(summary.succeeded, 1);
        // no file for AmazonRDS
        assert_eq!(summary.failed, 1);
        // no source registered for Azure
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.prices_inserted, 1);
        assert!(!summary.is_clean());
        assert_eq!(catalog.price_count().await, 1);
    }

    #[tokio::test]
    async fn test_reap_fails_stale_jobs() {
        let config = PipelineConfig::new().with_max_job_duration(Duration::from_millis(1));
        let (collector, _catalog, jobs) = collector(fixture_dir("reap"), config);

        let stuck = jobs
            .create(&IngestionScope::new(CloudProvider::Aws, "us-east-1", "AmazonEC2"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reaped = collector.reap().await.unwrap();
        assert_eq!(reaped.len(), 1);

        let recent = collector.recent_jobs(5).await.unwrap();
        assert_eq!(recent[0].id, stuck.id);
        assert_eq!(recent[0].status, JobStatus::Failed);
        assert!(recent[0].error_msg.as_deref().unwrap().starts_with("reaped:"));
    }
}
