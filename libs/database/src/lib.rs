//! Connection plumbing for the pricing catalog store.
//!
//! # Features
//!
//! - `postgres` (default) - PostgreSQL pool, migrations and health checks via SeaORM
//! - `config` - `PostgresConfig: core_config::FromEnv`
//!
//! ```ignore
//! use database::postgres::{self, PostgresConfig};
//! use migration::Migrator;
//!
//! let db = postgres::connect_from_config_with_retry(PostgresConfig::from_env()?, None).await?;
//! postgres::run_migrations::<Migrator>(&db, "pricing_catalog").await?;
//! ```

pub mod common;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use common::{DatabaseError, DatabaseResult};
