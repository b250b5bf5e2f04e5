//! Seed one tenant database with demo HR data.
//!
//! Creates deterministic roles, departments and employees, one attendance row
//! per employee per working day of the month, and a payroll run for that
//! month. Safe to re-run: existing rows are updated or left alone, and an
//! existing payroll run for the month is returned unchanged.
//!
//! Usage:
//!   DATABASE_URL=... ./seed-tenant-demo <tenantId> [--employees=N] [--month=M]
//!       [--year=Y] [--no-payroll] [--reset-attendance]
//!
//! Environment variables:
//!   DATABASE_URL         central database (required)
//!   TENANT_DATABASE_URL  server hosting tenant databases (default: DATABASE_URL)
//!   DEMO_PASSWORD        password for every demo account (default: Demo2024!)

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peoplehub_api::config::Config;
use peoplehub_api::db::registry::{find_subscription, find_tenant};
use peoplehub_api::db::tenant::ConnectionSwitcher;
use peoplehub_api::db::{self, TenantConnection};
use peoplehub_api::error::SeedError;
use peoplehub_api::models::payroll::format_cents;
use peoplehub_api::services::seeder::{DemoSeeder, SeedOptions};

#[derive(Parser)]
#[command(name = "seed-tenant-demo", about = "Seed a tenant database with demo HR data")]
struct Args {
    /// Tenant id in the central registry
    tenant_id: i64,

    /// Number of demo employees
    #[arg(long)]
    employees: Option<u32>,

    /// Payroll month, 1-12 (default: current month)
    #[arg(long)]
    month: Option<u32>,

    /// Payroll year, 2000-2100 (default: current year)
    #[arg(long)]
    year: Option<i32>,

    /// Skip the payroll run
    #[arg(long)]
    no_payroll: bool,

    /// Delete the month's attendance for demo employees before inserting
    #[arg(long)]
    reset_attendance: bool,
}

impl Args {
    fn options(&self) -> SeedOptions {
        let defaults = SeedOptions::default();
        SeedOptions {
            employees: self.employees.unwrap_or(defaults.employees),
            month: self.month.unwrap_or(defaults.month),
            year: self.year.unwrap_or(defaults.year),
            with_payroll: !self.no_payroll,
            reset_attendance: self.reset_attendance,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let options = args.options();
    // Reject bad input before touching any database.
    let period = options.validate()?;

    let config = Config::from_env().context("Invalid configuration")?;

    println!("=== Seed Tenant Demo ===");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to central database")?;
    let tenant = find_tenant(&pool, args.tenant_id)
        .await
        .context("Failed to query tenant registry")?
        .ok_or(SeedError::TenantNotFound(args.tenant_id))?;
    let subscription = match tenant.subscription_id {
        Some(id) => find_subscription(&pool, id)
            .await
            .context("Failed to query subscriptions")?,
        None => None,
    };
    pool.close().await;

    println!(
        "Tenant {} -> database {} ({})",
        tenant.id,
        tenant.database,
        subscription.map_or_else(|| "no subscription".to_string(), |s| s.name)
    );

    let switcher = ConnectionSwitcher::new(&config.tenant_database_url, config.tenant_max_connections)
        .context("Invalid TENANT_DATABASE_URL")?;
    let conn = switcher
        .use_tenant(&tenant.database)
        .await
        .with_context(|| format!("Cannot switch to tenant database {}", tenant.database))?;
    conn.ping()
        .await
        .with_context(|| format!("Tenant database {} is unreachable", tenant.database))?;

    let summary = DemoSeeder::new(&conn, config.demo_password.clone())
        .seed(&options)
        .await
        .with_context(|| format!("Failed to seed {} for {period}", tenant.database))?;
    switcher.close().await;

    println!();
    println!("=== Demo data ready ===");
    println!("  Database:   {}", summary.database);
    println!("  Period:     {}", summary.period);
    println!("  Employees:  {}", summary.employees);
    println!(
        "  Attendance: {} inserted, {} removed",
        summary.attendance_inserted, summary.attendance_deleted
    );
    match &summary.payroll_run {
        Some(run) => {
            let state = if summary.payroll_created { "created" } else { "already existed" };
            println!("  Payroll:    run {} {state}", run.id);
            println!("    Gross:    {}", format_cents(run.total_gross_cents));
            println!("    Tax:      {}", format_cents(run.total_tax_cents));
            println!("    Deduct:   {}", format_cents(run.total_deductions_cents));
            println!("    Net:      {}", format_cents(run.total_net_cents));
        }
        None => println!("  Payroll:    skipped"),
    }
    println!("  Login:      employee1@{}.demo / {}", summary.database, config.demo_password);

    Ok(())
}
