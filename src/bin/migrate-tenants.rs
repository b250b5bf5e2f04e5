//! Migrate every tenant database to the current catalog.
//!
//! Usage:
//!   DATABASE_URL=... ./migrate-tenants [--jobs N] [--json]
//!
//! Each tenant is classified (fresh, managed or legacy) and migrated with the
//! matching plan. Tenants whose full plan fails are retried with the legacy
//! plan. One tenant's failure never stops the others, and the exit status
//! only reflects whether the run itself completed.
//!
//! Environment variables:
//!   DATABASE_URL                 central database (required)
//!   TENANT_DATABASE_URL          server hosting tenant databases (default: DATABASE_URL)
//!   TENANT_POOL_MAX_CONNECTIONS  per-tenant pool size (default: 5)
//!   MIGRATE_JOBS                 tenants migrated at once (default: 1)

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peoplehub_api::config::Config;
use peoplehub_api::db::registry::list_tenants;
use peoplehub_api::db::tenant::{ConnectionSwitcher, TenantPools};
use peoplehub_api::db::{self, TenantConnector};
use peoplehub_api::models::tenant::Tenant;
use peoplehub_api::services::catalog::Catalog;
use peoplehub_api::services::orchestrator::{
    Orchestrator, Progress, RunSummary, TenantOutcome, TenantReport,
};
use peoplehub_api::services::planner::Planner;

#[derive(Parser)]
#[command(name = "migrate-tenants", about = "Apply tenant migrations to every tenant database")]
struct Args {
    /// Tenants migrated at once (overrides MIGRATE_JOBS)
    #[arg(long)]
    jobs: Option<usize>,

    /// Also print the full report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: RunSummary,
    tenants: &'a [TenantReport],
}

fn print_progress(progress: Progress<'_>) {
    match progress {
        Progress::Started(tenant) => {
            println!("Migrating tenant {} ({})...", tenant.id, tenant.database);
        }
        Progress::Finished(report) => {
            let mark = match report.outcome {
                TenantOutcome::Migrated => "OK",
                TenantOutcome::RecoveredByFallback => "RECOVERED",
                TenantOutcome::Failed => "FAILED",
            };
            let classification = report
                .classification
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unclassified".into());
            println!(
                "  [{mark}] tenant {} ({}, {classification}): {} applied, {} skipped",
                report.tenant_id,
                report.database,
                report.applied(),
                report.skipped()
            );
            if let Some(error) = &report.error {
                println!("         {error}");
            }
        }
    }
}

async fn migrate<K: TenantConnector>(
    connector: &K,
    tenants: &[Tenant],
    jobs: usize,
) -> Vec<TenantReport> {
    let orchestrator = Orchestrator::new(connector, Planner::new(Catalog::standard()));
    orchestrator.migrate_all(tenants, jobs, &print_progress).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Invalid configuration")?;
    let jobs = args.jobs.unwrap_or(config.migrate_jobs).max(1);

    Catalog::standard()
        .verify()
        .context("Refusing to migrate with an inconsistent catalog")?;

    println!("=== Migrate Tenants ===");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to central database")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to migrate central database")?;

    let tenants = list_tenants(&pool)
        .await
        .context("Failed to load tenant registry")?;
    println!("Found {} tenants, {jobs} at a time", tenants.len());

    let reports = if jobs == 1 {
        let switcher = ConnectionSwitcher::new(
            &config.tenant_database_url,
            config.tenant_max_connections,
        )
        .context("Invalid TENANT_DATABASE_URL")?;
        let reports = migrate(&switcher, &tenants, jobs).await;
        switcher.close().await;
        reports
    } else {
        let pools = TenantPools::new(
            &config.tenant_database_url,
            config.tenant_max_connections,
            jobs,
        )
        .context("Invalid TENANT_DATABASE_URL")?;
        let reports = migrate(&pools, &tenants, jobs).await;
        pools.close_all().await;
        reports
    };

    let summary = RunSummary::from_reports(&reports);
    println!();
    println!("=== Tenant migration complete ===");
    println!("  Tenants:   {}", summary.total);
    println!("  Migrated:  {}", summary.migrated);
    println!("  Recovered: {}", summary.recovered);
    println!("  Failed:    {}", summary.failed);

    if args.json {
        let report = JsonReport {
            summary,
            tenants: &reports,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    }

    pool.close().await;
    Ok(())
}
