use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PricingError, PricingResult};
use crate::models::{
    CloudProvider, IngestionJob, IngestionScope, JobStatus, NewPrice, NewProduct, Price, Product,
    ProductQuery, Upserted,
};
use crate::repository::{CatalogRepository, IngestionJobRepository};

#[derive(Default)]
struct CatalogState {
    products: BTreeMap<i64, Product>,
    product_keys: HashMap<(CloudProvider, String, String), i64>,
    prices: BTreeMap<i64, Price>,
    price_keys: HashMap<(i64, String), i64>,
    next_product_id: i64,
    next_price_id: i64,
}

/// In-memory catalog with the same uniqueness rules as the Postgres schema.
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn product_count(&self) -> usize {
        self.state.read().await.products.len()
    }

    pub async fn price_count(&self) -> usize {
        self.state.read().await.prices.len()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn upsert_product(&self, input: NewProduct) -> PricingResult<Upserted> {
        let mut state = self.state.write().await;

        let key = (input.provider, input.sku.clone(), input.meter_id.clone());
        if let Some(&id) = state.product_keys.get(&key) {
            return Ok(Upserted {
                id,
                inserted: false,
            });
        }

        state.next_product_id += 1;
        let id = state.next_product_id;
        let now = Utc::now();
        state.products.insert(
            id,
            Product {
                id,
                provider: input.provider,
                sku: input.sku,
                meter_id: input.meter_id,
                location: input.location,
                service: input.service,
                family: input.family,
                attributes: input.attributes,
                created_at: now,
                updated_at: now,
            },
        );
        state.product_keys.insert(key, id);

        Ok(Upserted { id, inserted: true })
    }

    async fn upsert_price(&self, product_id: i64, input: NewPrice) -> PricingResult<Upserted> {
        let mut state = self.state.write().await;

        if !state.products.contains_key(&product_id) {
            return Err(PricingError::ProductNotFound(product_id));
        }

        let hash = input.fingerprint();
        if let Some(&id) = state.price_keys.get(&(product_id, hash.clone())) {
            return Ok(Upserted {
                id,
                inserted: false,
            });
        }

        state.next_price_id += 1;
        let id = state.next_price_id;
        state.prices.insert(
            id,
            Price {
                id,
                product_id,
                hash: hash.clone(),
                currency: input.currency.trim().to_ascii_uppercase(),
                unit: input.unit,
                price: input.price,
                attributes: input.attributes,
                created_at: Utc::now(),
            },
        );
        state.price_keys.insert((product_id, hash), id);

        Ok(Upserted { id, inserted: true })
    }

    async fn find_products(&self, query: ProductQuery) -> PricingResult<Vec<Product>> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect())
    }

    async fn find_prices(&self, product_id: i64) -> PricingResult<Vec<Price>> {
        let state = self.state.read().await;
        Ok(state
            .prices
            .values()
            .filter(|p| p.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn find_prices_for(&self, product_ids: &[i64]) -> PricingResult<Vec<Price>> {
        let state = self.state.read().await;
        let mut prices: Vec<Price> = state
            .prices
            .values()
            .filter(|p| product_ids.contains(&p.product_id))
            .cloned()
            .collect();
        prices.sort_by_key(|p| (p.product_id, p.id));
        Ok(prices)
    }
}

/// In-memory ingestion job store
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, IngestionJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IngestionJobRepository for InMemoryJobStore {
    async fn create(&self, scope: &IngestionScope) -> PricingResult<IngestionJob> {
        let mut jobs = self.jobs.write().await;
        if jobs.values().any(|j| j.status.is_active() && &j.scope() == scope) {
            return Err(PricingError::ScopeBusy(scope.clone()));
        }

        let now = Utc::now();
        let job = IngestionJob {
            id: Uuid::now_v7(),
            provider: scope.provider,
            location: scope.location.clone(),
            service: scope.service.clone(),
            status: JobStatus::Pending,
            error_msg: None,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(job.id, job.clone());

        tracing::debug!(job_id = %job.id, scope = %scope, "Created ingestion job");
        Ok(job)
    }

    async fn get_by_id(&self, id: Uuid) -> PricingResult<Option<IngestionJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        error_msg: Option<String>,
    ) -> PricingResult<IngestionJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(PricingError::JobNotFound(id))?;

        if job.status != from || !from.can_transition_to(to) {
            return Err(PricingError::InvalidTransition {
                job_id: id,
                from: job.status,
                to,
            });
        }

        job.status = to;
        job.error_msg = error_msg;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn find_active(&self, scope: &IngestionScope) -> PricingResult<Option<IngestionJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .find(|j| j.status.is_active() && &j.scope() == scope)
            .cloned())
    }

    async fn list_recent(&self, limit: u64) -> PricingResult<Vec<IngestionJob>> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<IngestionJob> = jobs.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(limit as usize);
        Ok(result)
    }

    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        reason: String,
    ) -> PricingResult<Vec<IngestionJob>> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut reaped = Vec::new();

        for job in jobs.values_mut() {
            if job.status.is_active() && job.updated_at < cutoff {
                job.status = JobStatus::Failed;
                job.error_msg = Some(reason.clone());
                job.updated_at = now;
                reaped.push(job.clone());
            }
        }

        Ok(reaped)
    }
}
