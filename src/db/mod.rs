pub mod hr;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod registry;
pub mod schema;
pub mod tenant;

use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::error::DbError;
use schema::SchemaOp;

/// Name of the per-tenant migration history table.
pub const HISTORY_TABLE: &str = "migrations";

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the central-database migrations embedded in ./migrations/
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One row of a tenant's migration history.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct HistoryRecord {
    pub migration: String,
    pub batch: i32,
    /// Absent for rows written by tooling that predates checksums.
    pub checksum: Option<String>,
}

/// Introspection and DDL against one tenant database.
///
/// Every implementation targets exactly one physical database for its whole
/// lifetime; switching tenants means obtaining a new connection from a
/// [`TenantConnector`].
#[allow(async_fn_in_trait)]
pub trait TenantConnection {
    fn database(&self) -> &str;

    /// Forces the (lazy) connection to be established.
    async fn ping(&self) -> Result<(), DbError>;

    async fn list_tables(&self) -> Result<Vec<String>, DbError>;

    async fn has_table(&self, table: &str) -> Result<bool, DbError>;

    async fn has_column(&self, table: &str, column: &str) -> Result<bool, DbError>;

    async fn has_index(&self, index: &str) -> Result<bool, DbError>;

    /// Runs one schema operation without any guard.
    async fn execute(&self, op: &SchemaOp) -> Result<(), DbError>;

    /// Creates the history table if missing and adds columns that older
    /// history tables lack.
    async fn ensure_history_table(&self) -> Result<(), DbError>;

    /// Recorded units, ordered by batch then insertion.
    async fn applied_migrations(&self) -> Result<Vec<HistoryRecord>, DbError>;

    async fn record_migration(&self, record: &HistoryRecord) -> Result<(), DbError>;

    async fn forget_migration(&self, migration: &str) -> Result<(), DbError>;
}

/// Hands out connections to tenant databases.
#[allow(async_fn_in_trait)]
pub trait TenantConnector {
    type Connection: TenantConnection;

    async fn connect(&self, database: &str) -> Result<Self::Connection, DbError>;

    /// Closes whatever is held open for `database`. Called once its tenant
    /// is done; handles still around afterwards stop working.
    async fn release(&self, database: &str);

    /// How many tenant connections may be live at the same time.
    fn max_concurrency(&self) -> usize;
}
