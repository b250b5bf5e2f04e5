use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One customer organization, isolated in its own database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Tenant {
    pub id: i64,
    /// Physical database name. Unique across tenants and never renamed.
    pub database: String,
    pub subscription_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Builds an in-process tenant record, for tooling and tests that do not
    /// read the central registry.
    pub fn new(id: i64, database: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            database: database.into(),
            subscription_id: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub name: String,
    pub monthly_price_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
