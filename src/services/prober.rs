use serde::Serialize;

use crate::db::{TenantConnection, HISTORY_TABLE};
use crate::error::{DbError, MigrationError};
use crate::services::catalog::ANCHOR_TABLES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// No history table and none of the anchor tables.
    Fresh,
    /// Has a migration history table.
    Managed,
    /// At least one anchor table but no history.
    Legacy,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Classification::Fresh => "fresh",
            Classification::Managed => "managed",
            Classification::Legacy => "legacy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub classification: Classification,
    pub tables: Vec<String>,
    /// Set when the database was classified legacy from a partial state.
    pub ambiguous: Option<String>,
}

/// Inspects a tenant database and classifies it. Read-only.
pub async fn classify<C: TenantConnection>(conn: &C) -> Result<Probe, DbError> {
    let tables = conn.list_tables().await?;
    let has = |name: &str| tables.iter().any(|t| t == name);

    let missing: Vec<&str> = ANCHOR_TABLES.iter().copied().filter(|t| !has(*t)).collect();

    let (classification, ambiguous) = if has(HISTORY_TABLE) {
        (Classification::Managed, None)
    } else if missing.len() == ANCHOR_TABLES.len() {
        if !tables.is_empty() {
            tracing::info!(
                "{}: no anchor tables, ignoring {} unrelated table(s): {}",
                conn.database(),
                tables.len(),
                tables.join(", ")
            );
        }
        (Classification::Fresh, None)
    } else if !missing.is_empty() {
        (
            Classification::Legacy,
            Some(format!("missing anchor tables {}", missing.join(", "))),
        )
    } else {
        (Classification::Legacy, None)
    };

    if let Some(detail) = &ambiguous {
        let warning = MigrationError::ClassificationAmbiguous {
            database: conn.database().to_string(),
            detail: detail.clone(),
        };
        tracing::warn!("{warning}");
    }

    Ok(Probe {
        classification,
        tables,
        ambiguous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryDatabase, MemoryServer};
    use crate::db::TenantConnector;

    async fn probe(db: MemoryDatabase) -> Probe {
        let server = MemoryServer::new();
        server.insert("t", db);
        let conn = server.connect("t").await.unwrap();
        classify(&conn).await.unwrap()
    }

    #[tokio::test]
    async fn empty_database_is_fresh() {
        let p = probe(MemoryDatabase::new()).await;
        assert_eq!(p.classification, Classification::Fresh);
        assert!(p.ambiguous.is_none());
    }

    #[tokio::test]
    async fn history_table_means_managed() {
        let p = probe(
            MemoryDatabase::new()
                .with_table(HISTORY_TABLE, &["id", "migration", "batch"])
                .with_table("employees", &["id"]),
        )
        .await;
        assert_eq!(p.classification, Classification::Managed);
    }

    #[tokio::test]
    async fn all_anchors_without_history_is_legacy() {
        let p = probe(
            MemoryDatabase::new()
                .with_table("employees", &["id"])
                .with_table("departments", &["id"])
                .with_table("attendance_policies", &["id"]),
        )
        .await;
        assert_eq!(p.classification, Classification::Legacy);
        assert!(p.ambiguous.is_none());
    }

    #[tokio::test]
    async fn partial_anchors_are_legacy_but_flagged() {
        let p = probe(
            MemoryDatabase::new()
                .with_table("employees", &["id"])
                .with_table("departments", &["id"]),
        )
        .await;
        assert_eq!(p.classification, Classification::Legacy);
        assert!(p.ambiguous.unwrap().contains("attendance_policies"));
    }

    #[tokio::test]
    async fn unrelated_tables_alone_are_fresh() {
        let p = probe(MemoryDatabase::new().with_table("spatial_ref_sys", &["srid"])).await;
        assert_eq!(p.classification, Classification::Fresh);
        assert!(p.ambiguous.is_none());
        assert_eq!(p.tables, vec!["spatial_ref_sys".to_string()]);
    }

    #[tokio::test]
    async fn one_anchor_is_enough_for_legacy() {
        let p = probe(
            MemoryDatabase::new()
                .with_table("spatial_ref_sys", &["srid"])
                .with_table("departments", &["id", "name"]),
        )
        .await;
        assert_eq!(p.classification, Classification::Legacy);
        assert!(p.ambiguous.unwrap().contains("employees"));
    }
}
