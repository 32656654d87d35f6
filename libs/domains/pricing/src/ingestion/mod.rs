//! Ingestion pipeline: streams records from a pricing source into the
//! catalog, tracked by an ingestion job.
//!
//! ```text
//! pending --start--> running --success--> succeeded
//!                    running --error----> failed   (source/store/timeout/cancelled)
//! pending/running --reaper--> failed               (reaped)
//! ```
//!
//! Rows written before a failure are kept: the catalog is eventually
//! consistent across a job, never rolled back. Re-running a scope is safe
//! because every write is an idempotent upsert.

mod scope_lock;
mod source;

pub use scope_lock::{ScopeGuard, ScopeLocks};
pub use source::{PricingSource, RecordStream, SourceError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use observability::CatalogMetrics;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{IngestionError, PricingError, PricingResult};
use crate::models::{CloudProvider, IngestionJob, IngestionScope, JobStatus, PriceRecord};
use crate::repository::{CatalogRepository, IngestionJobRepository};

const FINISH_ATTEMPTS: u32 = 2;
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pipeline limits
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on opening the source and on every next-record poll
    pub fetch_timeout: Duration,
    /// Bound on a whole job; also the reaper's staleness threshold
    pub max_job_duration: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(60),
            max_job_duration: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-fetch timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the maximum job duration
    pub fn with_max_job_duration(mut self, duration: Duration) -> Self {
        self.max_job_duration = duration;
        self
    }
}

/// Outcome of one ingestion job
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub job_id: Uuid,
    pub scope: IngestionScope,
    pub status: JobStatus,
    pub products_inserted: u64,
    pub products_skipped: u64,
    pub prices_inserted: u64,
    pub prices_skipped: u64,
    /// Records or prices dropped because they failed validation
    pub rejected: u64,
    pub duration: Duration,
    pub error: Option<IngestionError>,
}

impl IngestionReport {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// Turns a failed job into `PricingError::Ingestion`
    pub fn into_result(self) -> PricingResult<Self> {
        match self.error {
            Some(e) => Err(PricingError::Ingestion(e)),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Default)]
struct Counts {
    records: u64,
    products_inserted: u64,
    products_skipped: u64,
    prices_inserted: u64,
    prices_skipped: u64,
    rejected: u64,
}

/// Runs ingestion jobs against a catalog
pub struct IngestionPipeline<C: CatalogRepository, J: IngestionJobRepository> {
    catalog: Arc<C>,
    jobs: Arc<J>,
    sources: HashMap<CloudProvider, Arc<dyn PricingSource>>,
    locks: ScopeLocks,
    config: PipelineConfig,
}

impl<C: CatalogRepository, J: IngestionJobRepository> IngestionPipeline<C, J> {
    pub fn new(catalog: Arc<C>, jobs: Arc<J>, config: PipelineConfig) -> Self {
        Self {
            catalog,
            jobs,
            sources: HashMap::new(),
            locks: ScopeLocks::new(),
            config,
        }
    }

    /// Register the source for its provider, replacing any previous one
    pub fn register_source(&mut self, source: Arc<dyn PricingSource>) {
        info!(
            provider = %source.provider(),
            source = source.name(),
            "Registered pricing source"
        );
        self.sources.insert(source.provider(), source);
    }

    pub fn with_source(mut self, source: Arc<dyn PricingSource>) -> Self {
        self.register_source(source);
        self
    }

    pub fn providers(&self) -> Vec<CloudProvider> {
        let mut providers: Vec<CloudProvider> = self.sources.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Most recent jobs first
    pub async fn recent_jobs(&self, limit: u64) -> PricingResult<Vec<IngestionJob>> {
        self.jobs.list_recent(limit).await
    }

    /// Run one ingestion job for `scope`.
    ///
    /// Returns `Err` only when no job could be started (unknown provider,
    /// scope busy, job store failure); a job created but never started is
    /// closed as `failed` first. Once a job runs the result is `Ok` and the
    /// report carries the terminal status; a failed job has `error` set
    /// with the same message stored on the job row.
    pub async fn ingest(
        &self,
        scope: IngestionScope,
        mut shutdown: watch::Receiver<bool>,
    ) -> PricingResult<IngestionReport> {
        let source = self
            .sources
            .get(&scope.provider)
            .cloned()
            .ok_or(PricingError::SourceNotRegistered(scope.provider))?;

        let _guard = self
            .locks
            .try_acquire(&scope)
            .ok_or_else(|| PricingError::ScopeBusy(scope.clone()))?;

        // the store rejects a second active job on the scope, whichever process holds it
        let job = self.jobs.create(&scope).await.inspect_err(|e| {
            if matches!(e, PricingError::ScopeBusy(_)) {
                debug!(scope = %scope, "Scope already has an active job");
            }
        })?;
        let job = match self
            .jobs
            .transition(job.id, JobStatus::Pending, JobStatus::Running, None)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.abandon(job.id, &e).await;
                return Err(e);
            }
        };

        let provider = scope.provider.to_string();
        CatalogMetrics::record_job_started(&provider, &scope.service);
        info!(job_id = %job.id, scope = %scope, source = source.name(), "Ingestion job started");

        let started = Instant::now();
        let mut counts = Counts::default();
        let max = self.config.max_job_duration;

        let outcome = match timeout(
            max,
            self.run_job(&scope, source.as_ref(), &mut counts, &mut shutdown),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(IngestionError::Timeout(format!(
                "job exceeded maximum duration of {}s",
                max.as_secs()
            ))),
        };

        // a job row that cannot be closed stays running until the reaper fails it
        let outcome = match outcome {
            Ok(()) => match self.finish(job.id, JobStatus::Succeeded, None).await {
                Ok(()) => Ok(()),
                Err(e) => Err(IngestionError::Store(format!(
                    "could not record job success: {}",
                    e
                ))),
            },
            Err(failure) => {
                if let Err(e) = self
                    .finish(job.id, JobStatus::Failed, Some(failure.to_string()))
                    .await
                {
                    error!(job_id = %job.id, error = %e, "Could not record job failure");
                }
                Err(failure)
            }
        };

        let duration = started.elapsed();
        let status = match &outcome {
            Ok(()) => {
                CatalogMetrics::record_job_succeeded(
                    &provider,
                    &scope.service,
                    counts.prices_inserted,
                    counts.prices_skipped,
                    duration.as_secs_f64(),
                );
                info!(
                    job_id = %job.id,
                    scope = %scope,
                    records = counts.records,
                    products_inserted = counts.products_inserted,
                    prices_inserted = counts.prices_inserted,
                    prices_skipped = counts.prices_skipped,
                    rejected = counts.rejected,
                    "Ingestion job succeeded"
                );
                JobStatus::Succeeded
            }
            Err(e) => {
                CatalogMetrics::record_job_failed(
                    &provider,
                    &scope.service,
                    e.cause(),
                    duration.as_secs_f64(),
                );
                error!(
                    job_id = %job.id,
                    scope = %scope,
                    records = counts.records,
                    error = %e,
                    "Ingestion job failed"
                );
                JobStatus::Failed
            }
        };

        Ok(IngestionReport {
            job_id: job.id,
            scope,
            status,
            products_inserted: counts.products_inserted,
            products_skipped: counts.products_skipped,
            prices_inserted: counts.prices_inserted,
            prices_skipped: counts.prices_skipped,
            rejected: counts.rejected,
            duration,
            error: outcome.err(),
        })
    }

    /// Close a running job, retrying once on a store error. Losing the race
    /// to the reaper is not an error.
    async fn finish(
        &self,
        job_id: Uuid,
        to: JobStatus,
        error_msg: Option<String>,
    ) -> PricingResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .jobs
                .transition(job_id, JobStatus::Running, to, error_msg.clone())
                .await
            {
                Ok(_) => return Ok(()),
                Err(PricingError::InvalidTransition { from, .. }) => {
                    warn!(job_id = %job_id, current = %from, target = %to, "Job was closed by someone else");
                    return Ok(());
                }
                Err(e) if attempt < FINISH_ATTEMPTS => {
                    warn!(job_id = %job_id, target = %to, error = %e, "Closing job failed, retrying");
                    tokio::time::sleep(FINISH_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort close of a job that never started running
    async fn abandon(&self, job_id: Uuid, cause: &PricingError) {
        let reason = IngestionError::Store(format!("could not start job: {}", cause)).to_string();
        match self
            .jobs
            .transition(job_id, JobStatus::Pending, JobStatus::Failed, Some(reason))
            .await
        {
            Ok(_) => warn!(job_id = %job_id, error = %cause, "Ingestion job abandoned before start"),
            Err(e) => error!(
                job_id = %job_id,
                error = %e,
                "Could not close abandoned job; the reaper will fail it"
            ),
        }
    }

    async fn run_job(
        &self,
        scope: &IngestionScope,
        source: &dyn PricingSource,
        counts: &mut Counts,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), IngestionError> {
        let fetch_timeout = self.config.fetch_timeout;

        let mut stream = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                return Err(IngestionError::Cancelled(
                    "shutdown requested before the source was opened".to_string(),
                ));
            }
            opened = timeout(fetch_timeout, source.open(scope)) => match opened {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(IngestionError::Source(e.to_string())),
                Err(_) => {
                    return Err(IngestionError::Timeout(format!(
                        "opening {} did not complete within {}ms",
                        source.name(),
                        fetch_timeout.as_millis()
                    )));
                }
            },
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    return Err(IngestionError::Cancelled(format!(
                        "shutdown requested after {} records",
                        counts.records
                    )));
                }
                next = timeout(fetch_timeout, stream.next()) => next.map_err(|_| {
                    IngestionError::Timeout(format!(
                        "no record from {} within {}ms after {} records",
                        source.name(),
                        fetch_timeout.as_millis(),
                        counts.records
                    ))
                })?,
            };

            let Some(record) = next else {
                return Ok(());
            };
            let record = record.map_err(|e| IngestionError::Source(e.to_string()))?;
            counts.records += 1;
            self.store_record(scope, record, counts).await?;
        }
    }

    async fn store_record(
        &self,
        scope: &IngestionScope,
        record: PriceRecord,
        counts: &mut Counts,
    ) -> Result<(), IngestionError> {
        let provider = scope.provider.to_string();
        let product = record.product;

        if let Err(e) = product.validate() {
            warn!(scope = %scope, sku = %product.sku, error = %e, "Rejected invalid product");
            counts.rejected += 1;
            CatalogMetrics::record_rejected(&provider);
            return Ok(());
        }

        if product.provider != scope.provider
            || product.location != scope.location
            || product.service != scope.service
        {
            warn!(
                scope = %scope,
                sku = %product.sku,
                location = %product.location,
                service = %product.service,
                "Rejected product outside the job scope"
            );
            counts.rejected += 1;
            CatalogMetrics::record_rejected(&provider);
            return Ok(());
        }

        let sku = product.sku.clone();
        let upserted = self
            .catalog
            .upsert_product(product)
            .await
            .map_err(|e| IngestionError::Store(e.to_string()))?;
        CatalogMetrics::record_upsert(&provider, "product", upserted.inserted);
        if upserted.inserted {
            counts.products_inserted += 1;
        } else {
            counts.products_skipped += 1;
        }

        for price in record.prices {
            if let Err(e) = price.validate() {
                warn!(scope = %scope, sku = %sku, error = %e, "Rejected invalid price");
                counts.rejected += 1;
                CatalogMetrics::record_rejected(&provider);
                continue;
            }

            let outcome = self
                .catalog
                .upsert_price(upserted.id, price)
                .await
                .map_err(|e| IngestionError::Store(e.to_string()))?;
            CatalogMetrics::record_upsert(&provider, "price", outcome.inserted);
            if outcome.inserted {
                counts.prices_inserted += 1;
            } else {
                debug!(sku = %sku, price_id = outcome.id, "Price unchanged, skipped");
                counts.prices_skipped += 1;
            }
        }

        Ok(())
    }

    /// Fail every job that has been pending or running for longer than
    /// `max_job_duration`, e.g. after a crash.
    pub async fn reap_stale_jobs(&self) -> PricingResult<Vec<IngestionJob>> {
        let max = self.config.max_job_duration;
        let max_age = chrono::Duration::from_std(max).map_err(|e| {
            PricingError::Configuration(format!("max_job_duration out of range: {}", e))
        })?;
        let cutoff = Utc::now() - max_age;
        let reason = IngestionError::Reaped(format!(
            "no progress for longer than {}s",
            max.as_secs()
        ))
        .to_string();

        let reaped = self.jobs.fail_stale(cutoff, reason).await?;
        for job in &reaped {
            warn!(job_id = %job.id, scope = %job.scope(), "Reaped stale ingestion job");
        }
        if !reaped.is_empty() {
            CatalogMetrics::record_jobs_reaped(reaped.len());
        }
        Ok(reaped)
    }
}

/// Resolves once shutdown is signalled; never if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
