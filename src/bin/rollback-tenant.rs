//! Revert the newest migration batches of one managed tenant database.
//!
//! Usage:
//!   DATABASE_URL=... ./rollback-tenant <tenantId> [--steps=N]

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peoplehub_api::config::Config;
use peoplehub_api::db::registry::find_tenant;
use peoplehub_api::db::tenant::ConnectionSwitcher;
use peoplehub_api::db::{self, TenantConnection};
use peoplehub_api::services::catalog::Catalog;
use peoplehub_api::services::executor::rollback;

#[derive(Parser)]
#[command(name = "rollback-tenant", about = "Revert the latest migration batches of a tenant")]
struct Args {
    /// Tenant id in the central registry
    tenant_id: i64,

    /// Number of batches to revert
    #[arg(long, default_value_t = 1)]
    steps: usize,
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

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to central database")?;
    let tenant = find_tenant(&pool, args.tenant_id)
        .await
        .context("Failed to query tenant registry")?
        .with_context(|| format!("Tenant {} not found", args.tenant_id))?;
    pool.close().await;

    let switcher = ConnectionSwitcher::new(&config.tenant_database_url, config.tenant_max_connections)
        .context("Invalid TENANT_DATABASE_URL")?;
    let conn = switcher.use_tenant(&tenant.database).await?;
    conn.ping()
        .await
        .with_context(|| format!("Tenant database {} is unreachable", tenant.database))?;

    let reverted = rollback(&conn, &Catalog::standard(), args.steps)
        .await
        .with_context(|| format!("Rollback of {} stopped", tenant.database))?;
    switcher.close().await;

    if reverted.is_empty() {
        println!("Nothing to roll back for {}", tenant.database);
    } else {
        println!("Reverted {} migrations on {}:", reverted.len(), tenant.database);
        for id in &reverted {
            println!("  {id}");
        }
    }
    Ok(())
}
