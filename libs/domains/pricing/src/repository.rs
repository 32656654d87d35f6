use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PricingResult;
use crate::models::{
    IngestionJob, IngestionScope, JobStatus, NewPrice, NewProduct, Price, Product, ProductQuery,
    Upserted,
};

/// Repository trait for the pricing catalog
///
/// Writes are idempotent and atomic per row: a duplicate key is a
/// successful no-op reported through [`Upserted::inserted`].
/// Implementations: [`crate::PgCatalogRepository`], [`crate::InMemoryCatalog`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Insert a product unless `(provider, sku, meter_id)` already exists
    async fn upsert_product(&self, product: NewProduct) -> PricingResult<Upserted>;

    /// Insert a price unless `(product_id, hash)` already exists.
    ///
    /// Fails with [`crate::PricingError::ProductNotFound`] when the product is missing.
    async fn upsert_price(&self, product_id: i64, price: NewPrice) -> PricingResult<Upserted>;

    /// Coarse exact-match scan, ordered by id
    async fn find_products(&self, query: ProductQuery) -> PricingResult<Vec<Product>>;

    /// All prices of a product, ordered by id
    async fn find_prices(&self, product_id: i64) -> PricingResult<Vec<Price>>;

    /// Prices of every listed product in one round trip, ordered by
    /// `(product_id, id)`; unknown ids contribute nothing
    async fn find_prices_for(&self, product_ids: &[i64]) -> PricingResult<Vec<Price>>;
}

/// Repository trait for ingestion job bookkeeping
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestionJobRepository: Send + Sync {
    /// Create a `pending` job for the scope.
    ///
    /// Atomic with respect to other writers: fails with
    /// [`crate::PricingError::ScopeBusy`] while the scope already has a
    /// `pending` or `running` job.
    async fn create(&self, scope: &IngestionScope) -> PricingResult<IngestionJob>;

    async fn get_by_id(&self, id: Uuid) -> PricingResult<Option<IngestionJob>>;

    /// Compare-and-set the status.
    ///
    /// Succeeds only when the job is currently in `from` and the state
    /// machine allows `from -> to`; otherwise returns
    /// [`crate::PricingError::InvalidTransition`].
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        error_msg: Option<String>,
    ) -> PricingResult<IngestionJob>;

    /// Pending or running job on the scope, if any
    async fn find_active(&self, scope: &IngestionScope) -> PricingResult<Option<IngestionJob>>;

    /// Most recent jobs first
    async fn list_recent(&self, limit: u64) -> PricingResult<Vec<IngestionJob>>;

    /// Fail every active job not updated since `cutoff`; returns the failed jobs
    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        reason: String,
    ) -> PricingResult<Vec<IngestionJob>>;
}
