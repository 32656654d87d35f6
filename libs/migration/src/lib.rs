pub use sea_orm_migration::prelude::*;

mod m20260105_000000_create_pricing_catalog;
mod m20260105_000001_create_ingestion_jobs;
mod m20260112_000000_unique_active_ingestion_job;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260105_000000_create_pricing_catalog::Migration),
            Box::new(m20260105_000001_create_ingestion_jobs::Migration),
            Box::new(m20260112_000000_unique_active_ingestion_job::Migration),
        ]
    }
}
