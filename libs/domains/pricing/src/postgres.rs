use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr,
};
use uuid::Uuid;

use crate::entity::{ingestion_jobs, prices, products};
use crate::error::{PricingError, PricingResult};
use crate::models::{
    IngestionJob, IngestionScope, JobStatus, NewPrice, NewProduct, Price, Product, ProductQuery,
    Upserted,
};
use crate::repository::{CatalogRepository, IngestionJobRepository};

/// PostgreSQL implementation of CatalogRepository
///
/// Upserts are `INSERT ... ON CONFLICT DO NOTHING` followed by a lookup on
/// the unique key, so each write is atomic per row.
#[derive(Clone)]
pub struct PgCatalogRepository {
    db: DatabaseConnection,
}

impl PgCatalogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn upsert_product(&self, input: NewProduct) -> PricingResult<Upserted> {
        let provider = input.provider;
        let sku = input.sku.clone();
        let meter_id = input.meter_id.clone();

        let model: products::ActiveModel = input.into();
        let rows = products::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    products::Column::Provider,
                    products::Column::Sku,
                    products::Column::MeterId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        let id = products::Entity::find()
            .select_only()
            .column(products::Column::Id)
            .filter(products::Column::Provider.eq(provider))
            .filter(products::Column::Sku.eq(sku.as_str()))
            .filter(products::Column::MeterId.eq(meter_id.as_str()))
            .into_tuple::<i64>()
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                DbErr::RecordNotFound(format!("product {}/{}/{}", provider, sku, meter_id))
            })?;

        Ok(Upserted {
            id,
            inserted: rows > 0,
        })
    }

    async fn upsert_price(&self, product_id: i64, input: NewPrice) -> PricingResult<Upserted> {
        let model = prices::active_model(product_id, &input);
        let hash = input.fingerprint();

        let rows = prices::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([prices::Column::ProductId, prices::Column::Hash])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
                    PricingError::ProductNotFound(product_id)
                }
                _ => PricingError::Database(e),
            })?;

        let id = prices::Entity::find()
            .select_only()
            .column(prices::Column::Id)
            .filter(prices::Column::ProductId.eq(product_id))
            .filter(prices::Column::Hash.eq(hash.as_str()))
            .into_tuple::<i64>()
            .one(&self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("price {}/{}", product_id, hash)))?;

        Ok(Upserted {
            id,
            inserted: rows > 0,
        })
    }

    async fn find_products(&self, query: ProductQuery) -> PricingResult<Vec<Product>> {
        let mut select = products::Entity::find();

        if let Some(provider) = query.provider {
            select = select.filter(products::Column::Provider.eq(provider));
        }

        if let Some(location) = query.location {
            select = select.filter(products::Column::Location.eq(location));
        }

        if let Some(service) = query.service {
            select = select.filter(products::Column::Service.eq(service));
        }

        if let Some(family) = query.family {
            select = select.filter(products::Column::Family.eq(family));
        }

        let results = select
            .order_by_asc(products::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Product::try_from)
            .collect::<PricingResult<Vec<_>>>()?;

        Ok(results)
    }

    async fn find_prices(&self, product_id: i64) -> PricingResult<Vec<Price>> {
        let results = prices::Entity::find()
            .filter(prices::Column::ProductId.eq(product_id))
            .order_by_asc(prices::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Price::try_from)
            .collect::<PricingResult<Vec<_>>>()?;

        Ok(results)
    }

    async fn find_prices_for(&self, product_ids: &[i64]) -> PricingResult<Vec<Price>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let results = prices::Entity::find()
            .filter(prices::Column::ProductId.is_in(product_ids.iter().copied()))
            .order_by_asc(prices::Column::ProductId)
            .order_by_asc(prices::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Price::try_from)
            .collect::<PricingResult<Vec<_>>>()?;

        Ok(results)
    }
}

/// PostgreSQL implementation of IngestionJobRepository
#[derive(Clone)]
pub struct PgIngestionJobRepository {
    db: DatabaseConnection,
}

impl PgIngestionJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn active_condition() -> Condition {
        Condition::any()
            .add(ingestion_jobs::Column::Status.eq(JobStatus::Pending))
            .add(ingestion_jobs::Column::Status.eq(JobStatus::Running))
    }
}

#[async_trait]
impl IngestionJobRepository for PgIngestionJobRepository {
    async fn create(&self, scope: &IngestionScope) -> PricingResult<IngestionJob> {
        let model: ingestion_jobs::ActiveModel = scope.into();
        // uq_ingestion_jobs_active_scope admits one pending/running job per scope
        let result = model
            .insert(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    PricingError::ScopeBusy(scope.clone())
                }
                _ => PricingError::Database(e),
            })?
            .into();
        Ok(result)
    }

    async fn get_by_id(&self, id: Uuid) -> PricingResult<Option<IngestionJob>> {
        let result = ingestion_jobs::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(Into::into);
        Ok(result)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        error_msg: Option<String>,
    ) -> PricingResult<IngestionJob> {
        let current = ingestion_jobs::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(PricingError::JobNotFound(id))?;

        let invalid = |actual: JobStatus| PricingError::InvalidTransition {
            job_id: id,
            from: actual,
            to,
        };

        if current.status != from || !from.can_transition_to(to) {
            return Err(invalid(current.status));
        }

        let mut model: ingestion_jobs::ActiveModel = current.into();
        model.status = Set(to);
        model.error_msg = Set(error_msg);
        model.updated_at = Set(Utc::now().into());

        // Guard on the old status so a concurrent writer (the reaper) wins cleanly
        let updated = ingestion_jobs::Entity::update(model)
            .filter(ingestion_jobs::Column::Status.eq(from))
            .exec(&self.db)
            .await;

        match updated {
            Ok(model) => Ok(model.into()),
            Err(DbErr::RecordNotUpdated) => {
                let actual = self
                    .get_by_id(id)
                    .await?
                    .map(|job| job.status)
                    .unwrap_or(from);
                Err(invalid(actual))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_active(&self, scope: &IngestionScope) -> PricingResult<Option<IngestionJob>> {
        let result = ingestion_jobs::Entity::find()
            .filter(ingestion_jobs::Column::Provider.eq(scope.provider))
            .filter(ingestion_jobs::Column::Location.eq(scope.location.as_str()))
            .filter(ingestion_jobs::Column::Service.eq(scope.service.as_str()))
            .filter(Self::active_condition())
            .order_by_desc(ingestion_jobs::Column::CreatedAt)
            .one(&self.db)
            .await?
            .map(Into::into);
        Ok(result)
    }

    async fn list_recent(&self, limit: u64) -> PricingResult<Vec<IngestionJob>> {
        let results = ingestion_jobs::Entity::find()
            .order_by_desc(ingestion_jobs::Column::CreatedAt)
            .order_by_desc(ingestion_jobs::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        Ok(results)
    }

    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        reason: String,
    ) -> PricingResult<Vec<IngestionJob>> {
        let cutoff: DateTime<FixedOffset> = cutoff.into();
        let stale = ingestion_jobs::Entity::find()
            .filter(Self::active_condition())
            .filter(ingestion_jobs::Column::UpdatedAt.lt(cutoff))
            .all(&self.db)
            .await?;

        let mut reaped = Vec::with_capacity(stale.len());
        for job in stale {
            match self
                .transition(job.id, job.status, JobStatus::Failed, Some(reason.clone()))
                .await
            {
                Ok(failed) => reaped.push(failed),
                // finished between the scan and the update
                Err(PricingError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(reaped)
    }
}
