use std::collections::HashMap;
use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tokio::sync::Mutex;

use super::schema::SchemaOp;
use super::{HistoryRecord, TenantConnection, TenantConnector, HISTORY_TABLE};
use crate::error::DbError;

/// Validates a tenant database name: lowercase ASCII letters, digits and
/// underscores, 1 to 63 characters, not starting with a digit.
/// Tenant database names end up in connection strings and log lines, so
/// anything else is refused before a connection is attempted.
pub fn is_valid_database_identifier(s: &str) -> bool {
    let len = s.len();
    (1..=63).contains(&len)
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

fn validate(database: &str) -> Result<(), DbError> {
    if is_valid_database_identifier(database) {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(database.to_string()))
    }
}

/// A pool bound to exactly one tenant database.
///
/// Cloning is cheap; clones share the underlying pool. Once the switcher
/// moves its slot to another tenant the pool is closed and further queries
/// through stale clones fail.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    database: String,
    pool: PgPool,
}

impl ConnectionHandle {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn lazy(base: &PgConnectOptions, database: &str, max_connections: u32) -> Self {
        let options = base.clone().database(database);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(options);
        Self {
            database: database.to_string(),
            pool,
        }
    }
}

// ─── Connection switching ─────────────────────────────────────────────────────

/// One shared connection slot, re-pointed at a tenant database on demand.
///
/// Only one tenant is active at a time: switching closes the previous pool.
/// Callers must therefore process tenants one after another, which is why
/// [`TenantConnector::max_concurrency`] is 1.
pub struct ConnectionSwitcher {
    base: PgConnectOptions,
    max_connections: u32,
    slot: Mutex<Option<ConnectionHandle>>,
}

impl ConnectionSwitcher {
    pub fn new(tenant_database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        Ok(Self {
            base: PgConnectOptions::from_str(tenant_database_url)?,
            max_connections,
            slot: Mutex::new(None),
        })
    }

    /// Points the slot at `database`. The previous pool is discarded and the
    /// new one connects on its first query.
    pub async fn use_tenant(&self, database: &str) -> Result<ConnectionHandle, DbError> {
        validate(database)?;

        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            previous.pool.close().await;
            tracing::debug!("Released connection to {}", previous.database);
        }

        let handle = ConnectionHandle::lazy(&self.base, database, self.max_connections);
        *slot = Some(handle.clone());
        tracing::debug!("Switched tenant connection to {database}");
        Ok(handle)
    }

    /// Closes whatever the slot currently points at.
    pub async fn close(&self) {
        if let Some(previous) = self.slot.lock().await.take() {
            previous.pool.close().await;
        }
    }
}

impl TenantConnector for ConnectionSwitcher {
    type Connection = ConnectionHandle;

    async fn connect(&self, database: &str) -> Result<ConnectionHandle, DbError> {
        self.use_tenant(database).await
    }

    async fn release(&self, database: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|h| h.database == database) {
            if let Some(handle) = slot.take() {
                handle.pool.close().await;
                tracing::debug!("Released connection to {database}");
            }
        }
    }

    fn max_concurrency(&self) -> usize {
        1
    }
}

/// Independent pools keyed by tenant database, for bounded parallel work.
pub struct TenantPools {
    base: PgConnectOptions,
    max_connections: u32,
    max_live: usize,
    pools: Mutex<HashMap<String, ConnectionHandle>>,
}

impl TenantPools {
    pub fn new(
        tenant_database_url: &str,
        max_connections: u32,
        max_live: usize,
    ) -> Result<Self, DbError> {
        Ok(Self {
            base: PgConnectOptions::from_str(tenant_database_url)?,
            max_connections,
            max_live: max_live.max(1),
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// Pools currently held open.
    pub async fn open_pools(&self) -> usize {
        self.pools.lock().await.len()
    }

    pub async fn close_all(&self) {
        let pools: Vec<ConnectionHandle> = self.pools.lock().await.drain().map(|(_, h)| h).collect();
        for handle in pools {
            handle.pool.close().await;
        }
    }
}

impl TenantConnector for TenantPools {
    type Connection = ConnectionHandle;

    async fn connect(&self, database: &str) -> Result<ConnectionHandle, DbError> {
        validate(database)?;
        let mut pools = self.pools.lock().await;
        let handle = pools
            .entry(database.to_string())
            .or_insert_with(|| ConnectionHandle::lazy(&self.base, database, self.max_connections));
        Ok(handle.clone())
    }

    async fn release(&self, database: &str) {
        let handle = self.pools.lock().await.remove(database);
        if let Some(handle) = handle {
            handle.pool.close().await;
            tracing::debug!("Closed pool for {database}");
        }
    }

    fn max_concurrency(&self) -> usize {
        self.max_live
    }
}

// ─── Introspection & DDL ──────────────────────────────────────────────────────

impl TenantConnection for ConnectionHandle {
    fn database(&self) -> &str {
        &self.database
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::TEXT FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }

    async fn has_table(&self, table: &str) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
               SELECT 1 FROM information_schema.tables
               WHERE table_schema = current_schema() AND table_name = $1
             )",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
               SELECT 1 FROM information_schema.columns
               WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
             )",
        )
        .bind(table)
        .bind(column)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn has_index(&self, index: &str) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
               SELECT 1 FROM pg_indexes
               WHERE schemaname = current_schema() AND indexname = $1
             )",
        )
        .bind(index)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn execute(&self, op: &SchemaOp) -> Result<(), DbError> {
        let sql = op.to_sql();
        tracing::debug!("{}: {sql}", self.database);
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_history_table(&self) -> Result<(), DbError> {
        sqlx::raw_sql(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{HISTORY_TABLE}" (
                id         SERIAL PRIMARY KEY,
                migration  VARCHAR(255) NOT NULL,
                batch      INTEGER NOT NULL,
                checksum   VARCHAR(64),
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            ALTER TABLE "{HISTORY_TABLE}" ADD COLUMN IF NOT EXISTS checksum VARCHAR(64);
            ALTER TABLE "{HISTORY_TABLE}" ADD COLUMN IF NOT EXISTS applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()"#
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn applied_migrations(&self) -> Result<Vec<HistoryRecord>, DbError> {
        let records = sqlx::query_as::<_, HistoryRecord>(&format!(
            r#"SELECT migration::TEXT AS migration, batch, checksum::TEXT AS checksum
               FROM "{HISTORY_TABLE}"
               ORDER BY batch, id"#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn record_migration(&self, record: &HistoryRecord) -> Result<(), DbError> {
        sqlx::query(&format!(
            r#"INSERT INTO "{HISTORY_TABLE}" (migration, batch, checksum) VALUES ($1, $2, $3)"#
        ))
        .bind(&record.migration)
        .bind(record.batch)
        .bind(&record.checksum)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn forget_migration(&self, migration: &str) -> Result<(), DbError> {
        sqlx::query(&format!(r#"DELETE FROM "{HISTORY_TABLE}" WHERE migration = $1"#))
            .bind(migration)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
