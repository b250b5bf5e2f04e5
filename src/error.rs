use thiserror::Error;

/// Failures raised by a tenant database backend.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("invalid database identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("database {database} is unreachable: {reason}")]
    Unavailable { database: String, reason: String },

    #[error("statement rejected on {table}: {reason}")]
    Rejected { table: String, reason: String },

    /// A unique key on `table` is already taken.
    #[error("duplicate key on {table}")]
    Duplicate { table: String },
}

/// Tenant-level migration failures.
///
/// None of these escape the orchestrator: they end up in the tenant's report
/// and the run moves on to the next tenant.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("cannot switch to tenant database {database}: {source}")]
    Connection {
        database: String,
        #[source]
        source: DbError,
    },

    #[error("tenant database {database} is in a partial state ({detail}); treating it as legacy")]
    ClassificationAmbiguous { database: String, detail: String },

    #[error("migration {unit} failed: {source}")]
    UnitFailed {
        unit: String,
        #[source]
        source: DbError,
    },

    #[error("primary plan failed ({primary}); legacy fallback failed ({fallback})")]
    FallbackFailed {
        primary: Box<MigrationError>,
        fallback: Box<MigrationError>,
    },

    #[error("migration catalog is out of order: {0}")]
    CatalogOrder(String),
}

/// Demo seeder failures. Validation errors are raised before any mutation.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("invalid seed options: {0}")]
    Validation(String),

    #[error("tenant {0} not found")]
    TenantNotFound(i64),

    #[error("tenant database {database} is missing tables: {} (run migrate-tenants first)", tables.join(", "))]
    MissingTables { database: String, tables: Vec<String> },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("failed to hash demo password: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
}

impl From<sqlx::Error> for SeedError {
    fn from(err: sqlx::Error) -> Self {
        SeedError::Db(DbError::Sqlx(err))
    }
}
