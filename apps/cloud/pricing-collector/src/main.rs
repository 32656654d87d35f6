//! Pricing Collector
//!
//! Keeps the pricing catalog fresh: runs one ingestion job per
//! `(provider, location, service)` scope, either once or on a cron schedule,
//! and reaps jobs abandoned by a crashed run.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use core_config::FromEnv;
use core_config::tracing::{init_tracing, install_color_eyre};
use database::postgres::{self, check_health_detailed};
use domain_pricing::{
    IngestionPipeline, IngestionScope, PgCatalogRepository, PgIngestionJobRepository,
};
use eyre::{Result, WrapErr};
use tokio::sync::watch;
use tracing::{info, warn};

mod collector;
mod config;
mod providers;

use collector::Collector;
use config::Config;

#[derive(Parser)]
#[command(name = "pricing-collector")]
#[command(about = "Load cloud provider prices into the pricing catalog")]
struct Cli {
    /// Print Prometheus metrics to stdout before exiting
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion job per scope and exit
    Ingest {
        /// Scopes as provider:location:service. Defaults to DEFAULT_SCOPES.
        scopes: Vec<IngestionScope>,
    },

    /// Ingest on a schedule until interrupted
    Schedule {
        /// Cron expression with seconds (default: every 6 hours)
        #[arg(short, long, default_value = "0 0 */6 * * *")]
        cron: String,

        /// Scopes as provider:location:service. Defaults to DEFAULT_SCOPES.
        scopes: Vec<IngestionScope>,
    },

    /// Fail jobs that have made no progress for longer than INGEST_MAX_JOB_SECS
    Reap,

    /// Show recent ingestion jobs as JSON
    Jobs {
        #[arg(short, long, default_value_t = 20)]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let cli = Cli::parse();
    let config = Config::from_env().wrap_err("Invalid collector configuration")?;
    init_tracing(&config.environment);
    observability::init_metrics();

    info!("Connecting to database...");
    let db = postgres::connect_from_config_with_retry(config.database.clone(), None)
        .await
        .wrap_err("Database connection failed")?;
    postgres::run_migrations::<migration::Migrator>(&db, "pricing_collector").await?;

    let health = check_health_detailed(&db).await;
    info!(healthy = health.healthy, response_time_ms = health.response_time_ms, "Database ready");

    let catalog = Arc::new(PgCatalogRepository::new(db.clone()));
    let jobs = Arc::new(PgIngestionJobRepository::new(db));
    let mut pipeline = IngestionPipeline::new(catalog, jobs, config.pipeline.clone());
    for source in providers::build_sources(&config) {
        pipeline.register_source(source);
    }
    info!(providers = ?pipeline.providers(), "Pricing sources registered");
    let collector = Collector::new(pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling running jobs");
            let _ = shutdown_tx.send(true);
        }
    });

    let scopes_or_default = |scopes: Vec<IngestionScope>| {
        if scopes.is_empty() {
            config.default_scopes.clone()
        } else {
            scopes
        }
    };

    let outcome = match cli.command {
        Commands::Ingest { scopes } => {
            collector.reap().await?;
            let summary = collector.ingest_all(scopes_or_default(scopes), shutdown_rx).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.is_clean() {
                Ok(())
            } else {
                Err(eyre::eyre!(
                    "{} job(s) failed, {} scope(s) could not start",
                    summary.failed,
                    summary.errors
                ))
            }
        }

        Commands::Schedule { cron, scopes } => {
            collector.reap().await?;
            collector
                .run_scheduled(&cron, scopes_or_default(scopes), shutdown_rx)
                .await
        }

        Commands::Reap => {
            let reaped = collector.reap().await?;
            info!(count = reaped.len(), "Reaper finished");
            println!("{}", serde_json::to_string_pretty(&reaped)?);
            Ok(())
        }

        Commands::Jobs { limit } => {
            let jobs = collector.recent_jobs(limit).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
    };

    if cli.print_metrics {
        print!("{}", observability::render_metrics());
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use domain_pricing::CloudProvider;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_scopes() {
        let cli = Cli::parse_from(["pricing-collector", "ingest", "aws:us-east-1:AmazonEC2", "azure:eastus:Virtual Machines"]);
        let Commands::Ingest { scopes } = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(scopes[1], IngestionScope::new(CloudProvider::Azure, "eastus", "Virtual Machines"));
    }

    #[test]
    fn test_cli_rejects_bad_scope() {
        assert!(Cli::try_parse_from(["pricing-collector", "ingest", "aws-us-east-1"]).is_err());
    }

    #[test]
    fn test_cli_schedule_defaults() {
        let cli = Cli::parse_from(["pricing-collector", "schedule"]);
        let Commands::Schedule { cron, scopes } = cli.command else {
            panic!("expected schedule");
        };
        assert_eq!(cron, "0 0 */6 * * *");
        assert!(scopes.is_empty());
    }
}
