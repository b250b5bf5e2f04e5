//! Drives every tenant through connect → classify → plan → execute, with a
//! legacy fallback when the full plan fails.
//!
//! Nothing returned from here is an `Err`: each tenant ends with a report,
//! and a failing tenant never stops the ones after it.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use crate::db::{TenantConnection, TenantConnector};
use crate::error::MigrationError;
use crate::models::tenant::Tenant;
use crate::services::executor::{run_plan, PlanFailed, UnitReport};
use crate::services::planner::{PlanKind, Planner};
use crate::services::prober::{classify, Classification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    Selected,
    ConnectionSwitched,
    ConnectionFailed,
    Classified,
    PrimaryPlanExecuting,
    PrimaryFailed,
    FallbackExecuting,
    FallbackFailed,
    /// The legacy plan failed as the primary plan; there is nothing to fall
    /// back to.
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantOutcome {
    Migrated,
    RecoveredByFallback,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantReport {
    pub tenant_id: i64,
    pub database: String,
    /// Every state visited, in order.
    pub states: Vec<TenantState>,
    pub classification: Option<Classification>,
    pub ambiguous: Option<String>,
    pub plan: Option<PlanKind>,
    pub units: Vec<UnitReport>,
    pub fallback_units: Vec<UnitReport>,
    pub outcome: TenantOutcome,
    /// For recovered tenants this is the primary plan's failure.
    pub error: Option<String>,
}

impl TenantReport {
    fn new(tenant: &Tenant) -> Self {
        Self {
            tenant_id: tenant.id,
            database: tenant.database.clone(),
            states: vec![TenantState::Selected],
            classification: None,
            ambiguous: None,
            plan: None,
            units: Vec::new(),
            fallback_units: Vec::new(),
            outcome: TenantOutcome::Failed,
            error: None,
        }
    }

    fn enter(&mut self, state: TenantState) {
        self.states.push(state);
    }

    pub fn state(&self) -> TenantState {
        self.states.last().copied().unwrap_or(TenantState::Selected)
    }

    /// Units that changed the schema on either path.
    pub fn applied(&self) -> usize {
        self.units
            .iter()
            .chain(&self.fallback_units)
            .filter(|u| u.outcome.is_applied())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.units.len() + self.fallback_units.len() - self.applied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub migrated: usize,
    pub recovered: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_reports(reports: &[TenantReport]) -> Self {
        let mut summary = Self {
            total: reports.len(),
            ..Self::default()
        };
        for report in reports {
            match report.outcome {
                TenantOutcome::Migrated => summary.migrated += 1,
                TenantOutcome::RecoveredByFallback => summary.recovered += 1,
                TenantOutcome::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Progress notifications for operator output.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    Started(&'a Tenant),
    Finished(&'a TenantReport),
}

pub struct Orchestrator<'a, K> {
    connector: &'a K,
    planner: Planner,
}

impl<'a, K: TenantConnector> Orchestrator<'a, K> {
    pub fn new(connector: &'a K, planner: Planner) -> Self {
        Self { connector, planner }
    }

    async fn connect(&self, database: &str) -> Result<K::Connection, MigrationError> {
        let connection_error = |source| MigrationError::Connection {
            database: database.to_string(),
            source,
        };
        let conn = self
            .connector
            .connect(database)
            .await
            .map_err(connection_error)?;
        if let Err(err) = conn.ping().await {
            self.connector.release(database).await;
            return Err(connection_error(err));
        }
        Ok(conn)
    }

    /// Migrates one tenant and reports how far it got. The tenant's
    /// connection is released before this returns.
    pub async fn migrate_tenant(&self, tenant: &Tenant) -> TenantReport {
        let mut report = TenantReport::new(tenant);

        let conn = match self.connect(&tenant.database).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!("tenant {}: {err}", tenant.id);
                report.enter(TenantState::ConnectionFailed);
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.enter(TenantState::ConnectionSwitched);

        self.run(tenant, &conn, &mut report).await;
        drop(conn);
        self.connector.release(&tenant.database).await;
        report
    }

    async fn run(&self, tenant: &Tenant, conn: &K::Connection, report: &mut TenantReport) {
        let probe = match classify(conn).await {
            Ok(probe) => probe,
            Err(source) => {
                let err = MigrationError::Connection {
                    database: tenant.database.clone(),
                    source,
                };
                tracing::error!("tenant {}: {err}", tenant.id);
                report.enter(TenantState::ConnectionFailed);
                report.error = Some(err.to_string());
                return;
            }
        };
        report.enter(TenantState::Classified);
        report.classification = Some(probe.classification);
        report.ambiguous = probe.ambiguous;

        let primary = self.planner.plan(probe.classification);
        tracing::info!(
            "tenant {} ({}): {} database, running {:?} plan of {} units",
            tenant.id,
            tenant.database,
            probe.classification,
            primary.kind,
            primary.len()
        );
        report.plan = Some(primary.kind);
        report.enter(TenantState::PrimaryPlanExecuting);

        let primary_error = match run_plan(conn, &primary).await {
            Ok(units) => {
                report.units = units;
                report.enter(TenantState::Succeeded);
                report.outcome = TenantOutcome::Migrated;
                return;
            }
            Err(PlanFailed { completed, error }) => {
                report.units = completed;
                error
            }
        };

        if primary.kind == PlanKind::Legacy {
            tracing::error!("tenant {}: {primary_error}", tenant.id);
            report.enter(TenantState::Failed);
            report.error = Some(primary_error.to_string());
            return;
        }

        tracing::warn!(
            "tenant {}: {primary_error}; retrying with the legacy plan",
            tenant.id
        );
        report.enter(TenantState::PrimaryFailed);
        report.enter(TenantState::FallbackExecuting);

        match run_plan(conn, &self.planner.fallback()).await {
            Ok(units) => {
                report.fallback_units = units;
                report.enter(TenantState::Succeeded);
                report.outcome = TenantOutcome::RecoveredByFallback;
                report.error = Some(primary_error.to_string());
            }
            Err(PlanFailed { completed, error }) => {
                let err = MigrationError::FallbackFailed {
                    primary: Box::new(primary_error),
                    fallback: Box::new(error),
                };
                tracing::error!("tenant {}: {err}", tenant.id);
                report.fallback_units = completed;
                report.enter(TenantState::FallbackFailed);
                report.error = Some(err.to_string());
            }
        }
    }

    /// Migrates `tenants`, up to `jobs` at a time (capped by what the
    /// connector allows). Reports come back in the order of `tenants`.
    pub async fn migrate_all(
        &self,
        tenants: &[Tenant],
        jobs: usize,
        progress: &dyn Fn(Progress<'_>),
    ) -> Vec<TenantReport> {
        let allowed = self.connector.max_concurrency().max(1);
        let limit = jobs.clamp(1, allowed);
        if jobs > allowed {
            tracing::warn!("connector allows {allowed} live tenant connection(s); running {limit} at a time");
        }

        let mut reports: Vec<(usize, TenantReport)> = stream::iter(tenants.iter().enumerate())
            .map(|(index, tenant)| async move {
                progress(Progress::Started(tenant));
                let report = self.migrate_tenant(tenant).await;
                progress(Progress::Finished(&report));
                (index, report)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }
}
