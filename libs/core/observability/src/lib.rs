//! Observability utilities for the pricing catalog.
//!
//! This crate provides:
//! - Prometheus metrics recording and rendering
//! - Catalog metrics for ingestion jobs, catalog writes and price resolution
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, CatalogMetrics};
//!
//! init_metrics();
//! CatalogMetrics::record_upsert("aws", "price", true);
//! println!("{}", observability::render_metrics());
//! ```

pub mod catalog;

pub use catalog::{CatalogMetrics, ResolutionTimer};

pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup.
/// Panics if another global recorder was installed first.
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        info!("Prometheus metrics recorder initialized");

        register_metric_descriptions();

        handle
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Render the current metrics in Prometheus text format
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    // Ingestion metrics
    describe_counter!(
        "ingestion_jobs_total",
        "Ingestion jobs by provider, service and status"
    );
    describe_gauge!(
        "ingestion_jobs_running",
        "Ingestion jobs currently running by provider"
    );
    describe_histogram!(
        "ingestion_job_duration_seconds",
        "Ingestion job duration in seconds"
    );
    describe_counter!(
        "ingestion_jobs_reaped_total",
        "Stale ingestion jobs failed by the reaper"
    );

    // Catalog metrics
    describe_counter!(
        "catalog_rows_total",
        "Catalog upserts by kind and outcome (inserted or skipped)"
    );
    describe_counter!(
        "catalog_records_rejected_total",
        "Source records rejected by validation"
    );

    // Resolution metrics
    describe_counter!(
        "price_resolutions_total",
        "Price resolutions by outcome"
    );
    describe_histogram!(
        "price_resolution_candidates",
        "Candidate prices considered per resolution"
    );
    describe_histogram!(
        "price_resolution_duration_seconds",
        "Price resolution duration in seconds"
    );
}
