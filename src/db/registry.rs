use sqlx::PgPool;

use crate::models::tenant::{Subscription, Tenant};

/// Every tenant in the central registry, oldest first.
pub async fn list_tenants(pool: &PgPool) -> Result<Vec<Tenant>, sqlx::Error> {
    sqlx::query_as::<_, Tenant>(
        "SELECT id, database, subscription_id, created_by, created_at, updated_at
         FROM tenants
         ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn find_tenant(pool: &PgPool, id: i64) -> Result<Option<Tenant>, sqlx::Error> {
    sqlx::query_as::<_, Tenant>(
        "SELECT id, database, subscription_id, created_by, created_at, updated_at
         FROM tenants
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_subscription(pool: &PgPool, id: i64) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        "SELECT id, name, monthly_price_cents, created_at, updated_at
         FROM subscriptions
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
