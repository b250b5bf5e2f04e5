//! Applies migration units to one tenant database.
//!
//! Every schema operation is preceded by an existence check, so running a
//! unit against a database that already has its effect is a no-op. Units on
//! the full path are recorded in the history table; the legacy path leaves
//! history alone.

use std::collections::HashMap;

use serde::Serialize;

use crate::db::schema::SchemaOp;
use crate::db::{HistoryRecord, TenantConnection, HISTORY_TABLE};
use crate::error::{DbError, MigrationError};
use crate::services::catalog::{Catalog, MigrationUnit};
use crate::services::planner::{Plan, PlanKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Listed in the history table.
    Recorded,
    /// Every operation's effect was already in the schema.
    AlreadyPresent,
    /// A table the unit builds on does not exist.
    MissingDependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum UnitOutcome {
    Applied,
    Skipped(SkipReason),
}

impl UnitOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UnitOutcome::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub unit: &'static str,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

/// A plan that stopped at a failing unit.
#[derive(Debug)]
pub struct PlanFailed {
    /// Units that finished before the failure.
    pub completed: Vec<UnitReport>,
    pub error: MigrationError,
}

fn unit_failed(unit: &str) -> impl FnOnce(DbError) -> MigrationError + '_ {
    move |source| MigrationError::UnitFailed {
        unit: unit.to_string(),
        source,
    }
}

/// What the guard decided for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Ran,
    Present,
    MissingDependency,
}

async fn all_columns<C: TenantConnection>(
    conn: &C,
    table: &str,
    columns: &[&str],
) -> Result<bool, DbError> {
    for column in columns {
        if !conn.has_column(table, column).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Runs `op` if its effect is missing and what it builds on exists.
///
/// On the legacy path a missing foreign-key target also skips the operation;
/// the full path runs it and lets the statement fail.
async fn guarded<C: TenantConnection>(
    conn: &C,
    op: &SchemaOp,
    kind: PlanKind,
) -> Result<Guard, DbError> {
    if kind == PlanKind::Legacy {
        for table in op.referenced_tables() {
            if !conn.has_table(table).await? {
                tracing::debug!("{}: {table} is missing, skipped {op:?}", conn.database());
                return Ok(Guard::MissingDependency);
            }
        }
    }

    let guard = match *op {
        SchemaOp::CreateTable { table, .. } => {
            if conn.has_table(table).await? {
                Guard::Present
            } else {
                Guard::Ran
            }
        }
        SchemaOp::AddColumn { table, column } => {
            if !conn.has_table(table).await? {
                Guard::MissingDependency
            } else if conn.has_column(table, column.name).await? {
                Guard::Present
            } else {
                Guard::Ran
            }
        }
        SchemaOp::RenameColumn { table, from, to } => {
            if conn.has_column(table, from).await? && !conn.has_column(table, to).await? {
                Guard::Ran
            } else {
                Guard::Present
            }
        }
        SchemaOp::DropColumn { table, column } => {
            if conn.has_column(table, column).await? {
                Guard::Ran
            } else {
                Guard::Present
            }
        }
        SchemaOp::DropTable { table } => {
            if conn.has_table(table).await? {
                Guard::Ran
            } else {
                Guard::Present
            }
        }
        SchemaOp::CreateIndex {
            table,
            name,
            columns,
            ..
        } => {
            if conn.has_index(name).await? {
                Guard::Present
            } else if !conn.has_table(table).await? || !all_columns(conn, table, columns).await? {
                Guard::MissingDependency
            } else {
                Guard::Ran
            }
        }
        SchemaOp::DropIndex { name, .. } => {
            if conn.has_index(name).await? {
                Guard::Ran
            } else {
                Guard::Present
            }
        }
    };

    match guard {
        Guard::Ran => conn.execute(op).await?,
        Guard::Present => tracing::debug!("{}: skipped {op:?}", conn.database()),
        Guard::MissingDependency => {
            tracing::debug!("{}: nothing to build on, skipped {op:?}", conn.database())
        }
    }
    Ok(guard)
}

async fn run_ops<C: TenantConnection>(
    conn: &C,
    unit: &MigrationUnit,
    ops: &[SchemaOp],
    kind: PlanKind,
) -> Result<UnitOutcome, MigrationError> {
    let mut ran_any = false;
    let mut missing_any = false;
    for op in ops {
        match guarded(conn, op, kind).await.map_err(unit_failed(unit.id))? {
            Guard::Ran => ran_any = true,
            Guard::Present => {}
            Guard::MissingDependency => missing_any = true,
        }
    }
    Ok(if ran_any {
        UnitOutcome::Applied
    } else if missing_any {
        UnitOutcome::Skipped(SkipReason::MissingDependency)
    } else {
        UnitOutcome::Skipped(SkipReason::AlreadyPresent)
    })
}

/// Applies one unit's `up` operations for a plan of `kind`. Does not touch
/// history.
pub async fn apply<C: TenantConnection>(
    conn: &C,
    unit: &MigrationUnit,
    kind: PlanKind,
) -> Result<UnitOutcome, MigrationError> {
    let outcome = run_ops(conn, unit, unit.up, kind).await?;
    match outcome {
        UnitOutcome::Applied => tracing::info!("{}: applied {}", conn.database(), unit.id),
        UnitOutcome::Skipped(SkipReason::MissingDependency) => tracing::warn!(
            "{}: skipped {}, the tables it builds on are missing",
            conn.database(),
            unit.id
        ),
        UnitOutcome::Skipped(_) => {}
    }
    Ok(outcome)
}

/// Applies one unit's `down` operations and drops its history record.
pub async fn revert<C: TenantConnection>(
    conn: &C,
    unit: &MigrationUnit,
) -> Result<UnitOutcome, MigrationError> {
    if unit.down.is_empty() {
        tracing::warn!("{}: {} has no down operations", conn.database(), unit.id);
    }
    let outcome = run_ops(conn, unit, unit.down, PlanKind::Full).await?;
    conn.forget_migration(unit.id)
        .await
        .map_err(unit_failed(unit.id))?;
    tracing::info!("{}: reverted {}", conn.database(), unit.id);
    Ok(outcome)
}

async fn load_history<C: TenantConnection>(conn: &C) -> Result<Vec<HistoryRecord>, DbError> {
    conn.ensure_history_table().await?;
    conn.applied_migrations().await
}

/// Runs a plan to completion or to its first failing unit.
pub async fn run_plan<C: TenantConnection>(
    conn: &C,
    plan: &Plan,
) -> Result<Vec<UnitReport>, PlanFailed> {
    let mut completed = Vec::with_capacity(plan.len());
    let fail = |completed: Vec<UnitReport>, error: MigrationError| PlanFailed { completed, error };

    match plan.kind {
        PlanKind::Legacy => {
            for unit in &plan.units {
                match apply(conn, unit, PlanKind::Legacy).await {
                    Ok(outcome) => completed.push(UnitReport {
                        unit: unit.id,
                        outcome,
                    }),
                    Err(error) => return Err(fail(completed, error)),
                }
            }
        }
        PlanKind::Full => {
            let records = match load_history(conn).await {
                Ok(records) => records,
                Err(source) => return Err(fail(completed, unit_failed(HISTORY_TABLE)(source))),
            };
            let batch = records.iter().map(|r| r.batch).max().unwrap_or(0) + 1;
            let recorded: HashMap<&str, Option<&str>> = records
                .iter()
                .map(|r| (r.migration.as_str(), r.checksum.as_deref()))
                .collect();

            for unit in &plan.units {
                if let Some(checksum) = recorded.get(unit.id) {
                    let current = unit.checksum();
                    if checksum.is_some_and(|c| c != current) {
                        tracing::warn!(
                            "{}: {} changed since it was applied (checksum {} != {current})",
                            conn.database(),
                            unit.id,
                            checksum.unwrap_or_default()
                        );
                    }
                    completed.push(UnitReport {
                        unit: unit.id,
                        outcome: UnitOutcome::Skipped(SkipReason::Recorded),
                    });
                    continue;
                }

                let outcome = match apply(conn, unit, PlanKind::Full).await {
                    Ok(outcome) => outcome,
                    Err(error) => return Err(fail(completed, error)),
                };
                let record = HistoryRecord {
                    migration: unit.id.to_string(),
                    batch,
                    checksum: Some(unit.checksum()),
                };
                if let Err(source) = conn.record_migration(&record).await {
                    return Err(fail(completed, unit_failed(unit.id)(source)));
                }
                completed.push(UnitReport {
                    unit: unit.id,
                    outcome,
                });
            }
        }
    }

    Ok(completed)
}

/// Reverts every unit recorded in the newest `steps` batches, newest first.
/// Returns the reverted unit ids. A database without history has nothing
/// to roll back.
pub async fn rollback<C: TenantConnection>(
    conn: &C,
    catalog: &Catalog,
    steps: usize,
) -> Result<Vec<String>, MigrationError> {
    let has_history = conn
        .has_table(HISTORY_TABLE)
        .await
        .map_err(unit_failed(HISTORY_TABLE))?;
    if !has_history {
        tracing::warn!("{}: no migration history, nothing to roll back", conn.database());
        return Ok(Vec::new());
    }

    let records = conn
        .applied_migrations()
        .await
        .map_err(unit_failed(HISTORY_TABLE))?;
    let mut batches: Vec<i32> = records.iter().map(|r| r.batch).collect();
    batches.sort_unstable();
    batches.dedup();
    let targets: Vec<i32> = batches.into_iter().rev().take(steps).collect();

    let mut reverted = Vec::new();
    for record in records.iter().rev().filter(|r| targets.contains(&r.batch)) {
        match catalog.get(&record.migration) {
            Some(unit) => {
                revert(conn, unit).await?;
            }
            None => {
                tracing::warn!(
                    "{}: {} is not in the catalog; forgetting it without schema changes",
                    conn.database(),
                    record.migration
                );
                conn.forget_migration(&record.migration)
                    .await
                    .map_err(unit_failed(&record.migration))?;
            }
        }
        reverted.push(record.migration.clone());
    }
    Ok(reverted)
}
