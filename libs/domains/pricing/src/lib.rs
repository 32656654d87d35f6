//! Pricing Domain
//!
//! Catalog of provider price data and the engine that resolves cost
//! requests against it.
//!
//! # Architecture
//!
//! ```text
//!  PricingSource ──► IngestionPipeline ──┐            (writes, one job per scope)
//!                                        ▼
//!                             ┌──────────────────┐
//!                             │ CatalogRepository │  ← Postgres or in-memory
//!                             └─────────┬────────┘
//!                                       ▼
//!  ComponentProducer ──► CostAggregator ──► ResolutionEngine   (reads)
//!                             │
//!                             └──► tier bucket calculator (graduated pricing)
//! ```
//!
//! The catalog is injected into both the pipeline and the engine; there is
//! no process-wide catalog state.

pub mod aggregator;
pub mod entity;
pub mod error;
pub mod filter;
pub mod ingestion;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod producer;
pub mod repository;
pub mod resolver;
pub mod tiers;

// Re-export commonly used types
pub use aggregator::{
    ComponentCost, CostAggregator, CostComponentRequest, CostStatus, EstimateConfig,
    EstimateReport, HOURS_PER_MONTH, Quantity, ResourceCost, ResourceRequest, TierCost,
    TieredUsage,
};
pub use error::{IngestionError, PricingError, PricingResult};
pub use filter::{AttributeFilter, FilterSet, PriceFilter, ProductFilter};
pub use ingestion::{
    IngestionPipeline, IngestionReport, PipelineConfig, PricingSource, RecordStream, SourceError,
};
pub use memory::{InMemoryCatalog, InMemoryJobStore};
pub use models::{
    Attributes, CloudProvider, IngestionJob, IngestionScope, JobStatus, NewPrice, NewProduct,
    Price, PriceRecord, Product, ProductQuery, Upserted, price_hash,
};
pub use postgres::{PgCatalogRepository, PgIngestionJobRepository};
pub use producer::{ComponentProducer, ProducerRegistry};
pub use repository::{CatalogRepository, IngestionJobRepository};
pub use resolver::{Resolution, ResolutionEngine, ResolvedPrice};
pub use tiers::{calculate_tier_buckets, tier_lower_bounds};
