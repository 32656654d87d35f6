//! Metrics for the pricing catalog: ingestion jobs, catalog writes and
//! price resolution.

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Catalog metrics recorder
pub struct CatalogMetrics;

impl CatalogMetrics {
    // =========================================================================
    // Ingestion Job Metrics
    // =========================================================================

    /// Record an ingestion job entering `running`
    pub fn record_job_started(provider: &str, service: &str) {
        counter!(
            "ingestion_jobs_total",
            "provider" => provider.to_string(),
            "service" => service.to_string(),
            "status" => "started"
        )
        .increment(1);
        gauge!("ingestion_jobs_running", "provider" => provider.to_string()).increment(1.0);
    }

    /// Record an ingestion job reaching `succeeded`
    pub fn record_job_succeeded(
        provider: &str,
        service: &str,
        inserted: u64,
        skipped: u64,
        duration_secs: f64,
    ) {
        counter!(
            "ingestion_jobs_total",
            "provider" => provider.to_string(),
            "service" => service.to_string(),
            "status" => "succeeded"
        )
        .increment(1);
        gauge!("ingestion_jobs_running", "provider" => provider.to_string()).decrement(1.0);

        histogram!(
            "ingestion_job_duration_seconds",
            "provider" => provider.to_string(),
            "service" => service.to_string()
        )
        .record(duration_secs);

        tracing::info!(
            provider = provider,
            service = service,
            inserted = inserted,
            skipped = skipped,
            duration_secs = duration_secs,
            "Ingestion job succeeded"
        );
    }

    /// Record an ingestion job reaching `failed`; `cause` is the error tag
    pub fn record_job_failed(provider: &str, service: &str, cause: &str, duration_secs: f64) {
        counter!(
            "ingestion_jobs_total",
            "provider" => provider.to_string(),
            "service" => service.to_string(),
            "status" => "failed",
            "cause" => cause.to_string()
        )
        .increment(1);
        gauge!("ingestion_jobs_running", "provider" => provider.to_string()).decrement(1.0);

        histogram!(
            "ingestion_job_duration_seconds",
            "provider" => provider.to_string(),
            "service" => service.to_string()
        )
        .record(duration_secs);
    }

    /// Record jobs failed by the stale-job reaper
    pub fn record_jobs_reaped(count: usize) {
        counter!("ingestion_jobs_reaped_total").increment(count as u64);
    }

    // =========================================================================
    // Catalog Write Metrics
    // =========================================================================

    /// Record one upsert; `kind` is `product` or `price`
    pub fn record_upsert(provider: &str, kind: &'static str, inserted: bool) {
        let outcome = if inserted { "inserted" } else { "skipped" };
        counter!(
            "catalog_rows_total",
            "provider" => provider.to_string(),
            "kind" => kind,
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record a source record rejected by validation
    pub fn record_rejected(provider: &str) {
        counter!("catalog_records_rejected_total", "provider" => provider.to_string())
            .increment(1);
    }

    // =========================================================================
    // Resolution Metrics
    // =========================================================================

    /// Record a resolve call; `outcome` is `priced`, `not_found` or `error`
    pub fn record_resolution(outcome: &'static str, candidates: usize) {
        counter!("price_resolutions_total", "outcome" => outcome).increment(1);
        histogram!("price_resolution_candidates").record(candidates as f64);
    }
}

/// Timer guard for automatic duration recording.
///
/// Records into `price_resolution_duration_seconds` when stopped or dropped.
pub struct ResolutionTimer {
    start: Instant,
    stopped: bool,
}

impl ResolutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            stopped: false,
        }
    }

    /// Stop the timer and record the duration. Returns duration in milliseconds.
    pub fn stop(&mut self) -> u64 {
        if self.stopped {
            return 0;
        }
        self.stopped = true;

        let duration = self.start.elapsed();
        histogram!("price_resolution_duration_seconds").record(duration.as_secs_f64());
        duration.as_millis() as u64
    }
}

impl Drop for ResolutionTimer {
    fn drop(&mut self) {
        if !self.stopped {
            self.stop();
        }
    }
}
