use std::cell::RefCell;

use peoplehub_api::db::memory::{MemoryDatabase, MemoryServer};
use peoplehub_api::db::schema::SchemaOp;
use peoplehub_api::db::{TenantConnector, HISTORY_TABLE};
use peoplehub_api::models::tenant::Tenant;
use peoplehub_api::services::catalog::{Catalog, ANCHOR_TABLES};
use peoplehub_api::services::executor::{rollback, run_plan, SkipReason, UnitOutcome};
use peoplehub_api::services::orchestrator::{
    Orchestrator, Progress, RunSummary, TenantOutcome, TenantReport, TenantState,
};
use peoplehub_api::services::planner::{Plan, PlanKind, Planner};
use peoplehub_api::services::prober::Classification;

fn legacy_database() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_table(
            "employees",
            &["id", "department_id", "first_name", "last_name", "email", "phone"],
        )
        .with_table("departments", &["id", "name"])
}

fn no_progress(_: Progress<'_>) {}

async fn migrate_one(server: &MemoryServer, tenant: &Tenant) -> TenantReport {
    Orchestrator::new(server, Planner::default())
        .migrate_tenant(tenant)
        .await
}

#[tokio::test]
async fn fresh_database_gets_every_unit_recorded() {
    let server = MemoryServer::new();
    server.insert("fresh_db", MemoryDatabase::new());
    let catalog = Catalog::standard();

    let report = migrate_one(&server, &Tenant::new(1, "fresh_db")).await;

    assert_eq!(report.outcome, TenantOutcome::Migrated);
    assert_eq!(report.classification, Some(Classification::Fresh));
    assert_eq!(report.plan, Some(PlanKind::Full));
    assert_eq!(report.units.len(), catalog.len());
    assert!(report.units.iter().all(|u| u.outcome == UnitOutcome::Applied));
    assert_eq!(
        report.states,
        vec![
            TenantState::Selected,
            TenantState::ConnectionSwitched,
            TenantState::Classified,
            TenantState::PrimaryPlanExecuting,
            TenantState::Succeeded,
        ]
    );

    let db = server.database("fresh_db").unwrap();
    assert_eq!(db.history().len(), catalog.len());
    assert!(db.history().iter().all(|r| r.batch == 1));
    assert!(db.schema().has_column("employees", "phone_number"));
    assert!(!db.schema().has_column("employees", "phone"));
    assert!(db.schema().has_column("payroll_items", "attendance_deduction_cents"));
}

#[tokio::test]
async fn second_full_run_changes_nothing() {
    let server = MemoryServer::new();
    server.insert("fresh_db", MemoryDatabase::new());
    let tenant = Tenant::new(1, "fresh_db");

    migrate_one(&server, &tenant).await;
    let after_first = server.database("fresh_db").unwrap();

    let report = migrate_one(&server, &tenant).await;
    let after_second = server.database("fresh_db").unwrap();

    assert_eq!(report.classification, Some(Classification::Managed));
    assert_eq!(report.outcome, TenantOutcome::Migrated);
    assert!(report
        .units
        .iter()
        .all(|u| u.outcome == UnitOutcome::Skipped(SkipReason::Recorded)));
    assert_eq!(after_first.schema(), after_second.schema());
    assert_eq!(after_first.history(), after_second.history());
    assert_eq!(after_first.executed().len(), after_second.executed().len());
}

#[tokio::test]
async fn managed_database_with_partial_history_catches_up() {
    let catalog = Catalog::standard();
    let server = MemoryServer::new();
    server.insert("tenant_a", MemoryDatabase::new());
    let conn = server.connect("tenant_a").await.unwrap();

    // An older deployment applied the first five units.
    let older = Plan {
        kind: PlanKind::Full,
        units: catalog.units()[..5].iter().collect(),
    };
    run_plan(&conn, &older).await.unwrap();

    let report = migrate_one(&server, &Tenant::new(1, "tenant_a")).await;
    assert_eq!(report.classification, Some(Classification::Managed));
    assert_eq!(report.outcome, TenantOutcome::Migrated);
    assert_eq!(
        report
            .units
            .iter()
            .filter(|u| u.outcome == UnitOutcome::Skipped(SkipReason::Recorded))
            .count(),
        5
    );

    let db = server.database("tenant_a").unwrap();
    let batches: Vec<i32> = db.history().iter().map(|r| r.batch).collect();
    assert_eq!(batches.iter().filter(|b| **b == 1).count(), 5);
    assert_eq!(batches.iter().filter(|b| **b == 2).count(), catalog.len() - 5);
}

#[tokio::test]
async fn legacy_database_only_gets_additive_changes() {
    let server = MemoryServer::new();
    server.insert("legacy_db", legacy_database());

    let report = migrate_one(&server, &Tenant::new(2, "legacy_db")).await;

    assert_eq!(report.classification, Some(Classification::Legacy));
    assert!(report.ambiguous.as_deref().unwrap().contains("attendance_policies"));
    assert_eq!(report.plan, Some(PlanKind::Legacy));
    assert_eq!(report.outcome, TenantOutcome::Migrated);

    let db = server.database("legacy_db").unwrap();
    for op in db.executed() {
        assert!(!op.is_destructive(), "{op:?}");
        if let SchemaOp::CreateTable { table, .. } = op {
            assert!(!ANCHOR_TABLES.contains(table), "recreated {table}");
        }
    }
    assert!(db.history().is_empty());
    assert!(!db.schema().tables.contains_key(HISTORY_TABLE));
    assert!(!db.schema().tables.contains_key("attendance_policies"));
    for column in ["role_id", "salary_cents", "password_hash", "face_descriptor"] {
        assert!(db.schema().has_column("employees", column), "{column}");
    }
    // The rename is not legacy-safe.
    assert!(db.schema().has_column("employees", "phone"));
    assert!(db.schema().tables.contains_key("payroll_runs"));
}

#[tokio::test]
async fn legacy_plan_is_idempotent() {
    let server = MemoryServer::new();
    server.insert("legacy_db", legacy_database());
    let tenant = Tenant::new(2, "legacy_db");

    migrate_one(&server, &tenant).await;
    let first = server.database("legacy_db").unwrap();
    let report = migrate_one(&server, &tenant).await;
    let second = server.database("legacy_db").unwrap();

    assert_eq!(report.outcome, TenantOutcome::Migrated);
    assert!(report.units.iter().all(|u| !u.outcome.is_applied()));
    // attendance_policies never existed, so its columns have nowhere to go.
    let geofence = report
        .units
        .iter()
        .find(|u| u.unit == "2024_04_02_000001_add_geofence_columns_to_attendance_policies")
        .unwrap();
    assert_eq!(geofence.outcome, UnitOutcome::Skipped(SkipReason::MissingDependency));
    assert!(report
        .units
        .iter()
        .filter(|u| u.unit != geofence.unit)
        .all(|u| u.outcome == UnitOutcome::Skipped(SkipReason::AlreadyPresent)));
    assert_eq!(first.schema(), second.schema());
    assert_eq!(first.executed(), second.executed());
}

#[tokio::test]
async fn unrelated_tables_do_not_make_a_database_legacy() {
    let server = MemoryServer::new();
    server.insert(
        "geo_db",
        MemoryDatabase::new().with_table("spatial_ref_sys", &["srid", "auth_name"]),
    );

    let report = migrate_one(&server, &Tenant::new(8, "geo_db")).await;

    assert_eq!(report.classification, Some(Classification::Fresh));
    assert!(report.ambiguous.is_none());
    assert_eq!(report.plan, Some(PlanKind::Full));
    assert_eq!(report.outcome, TenantOutcome::Migrated);
    let db = server.database("geo_db").unwrap();
    for table in ANCHOR_TABLES {
        assert!(db.schema().tables.contains_key(table), "{table}");
    }
    assert!(db.schema().has_column("spatial_ref_sys", "srid"));
    assert_eq!(db.history().len(), Catalog::standard().len());
}

#[tokio::test]
async fn legacy_database_with_one_anchor_completes() {
    let server = MemoryServer::new();
    server.insert("dept_only", MemoryDatabase::new().with_table("departments", &["id", "name"]));
    let tenant = Tenant::new(9, "dept_only");

    let report = migrate_one(&server, &tenant).await;

    assert_eq!(report.classification, Some(Classification::Legacy));
    assert!(report.ambiguous.as_deref().unwrap().contains("employees"));
    assert_eq!(report.outcome, TenantOutcome::Migrated, "{:?}", report.error);
    assert_eq!(report.state(), TenantState::Succeeded);
    let attendances = report
        .units
        .iter()
        .find(|u| u.unit == "2024_01_01_000005_create_attendances_table")
        .unwrap();
    assert_eq!(attendances.outcome, UnitOutcome::Skipped(SkipReason::MissingDependency));

    let db = server.database("dept_only").unwrap();
    assert!(!db.schema().tables.contains_key("employees"));
    assert!(!db.schema().tables.contains_key("attendances"));
    assert!(db.schema().tables.contains_key("roles"));
    assert!(db.schema().tables.contains_key("payroll_runs"));
    assert!(db.history().is_empty());

    // Every later run ends the same way.
    let again = migrate_one(&server, &tenant).await;
    assert_eq!(again.outcome, TenantOutcome::Migrated);
    assert_eq!(again.applied(), 0);
}

#[tokio::test]
async fn failed_full_plan_recovers_with_legacy_plan() {
    // History exists from earlier tooling, employees predates it, and
    // departments cannot be created.
    let server = MemoryServer::new();
    server.insert(
        "half_done",
        MemoryDatabase::new()
            .with_table(HISTORY_TABLE, &["id", "migration", "batch"])
            .with_table("employees", &["id", "first_name", "last_name", "email"])
            .reject_table("departments"),
    );

    let report = migrate_one(&server, &Tenant::new(3, "half_done")).await;

    assert_eq!(report.classification, Some(Classification::Managed));
    assert_eq!(report.outcome, TenantOutcome::RecoveredByFallback);
    assert_eq!(
        &report.states[3..],
        &[
            TenantState::PrimaryPlanExecuting,
            TenantState::PrimaryFailed,
            TenantState::FallbackExecuting,
            TenantState::Succeeded,
        ]
    );
    assert!(report.error.as_deref().unwrap().contains("create_departments"));
    assert_eq!(report.units.len(), 1);
    assert_eq!(report.fallback_units.len(), Catalog::standard().legacy_units().count());

    let db = server.database("half_done").unwrap();
    assert!(db.schema().has_column("employees", "salary_cents"));
    assert!(db.schema().tables.contains_key("payroll_items"));
    // Only the unit that ran on the full path is recorded.
    assert_eq!(db.history().len(), 1);
}

#[tokio::test]
async fn failing_fallback_is_terminal() {
    let server = MemoryServer::new();
    server.insert("doomed", MemoryDatabase::new().reject_table("roles"));

    let report = migrate_one(&server, &Tenant::new(4, "doomed")).await;

    assert_eq!(report.outcome, TenantOutcome::Failed);
    assert_eq!(report.state(), TenantState::FallbackFailed);
    let error = report.error.unwrap();
    assert!(error.contains("legacy fallback failed"), "{error}");
}

#[tokio::test]
async fn failing_legacy_primary_does_not_retry() {
    let server = MemoryServer::new();
    server.insert("legacy_db", legacy_database().reject_table("payroll_items"));

    let report = migrate_one(&server, &Tenant::new(5, "legacy_db")).await;

    assert_eq!(report.outcome, TenantOutcome::Failed);
    assert_eq!(report.state(), TenantState::Failed);
    assert!(!report.states.contains(&TenantState::FallbackExecuting));
    assert!(report.fallback_units.is_empty());
    // Units before the failing one stay applied.
    let db = server.database("legacy_db").unwrap();
    assert!(db.schema().tables.contains_key("payroll_runs"));
}

#[tokio::test]
async fn unreachable_database_stops_at_connection() {
    let server = MemoryServer::new();
    server.insert("offline", MemoryDatabase::new());
    server.mark_unreachable("offline");

    let report = migrate_one(&server, &Tenant::new(6, "offline")).await;

    assert_eq!(report.outcome, TenantOutcome::Failed);
    assert_eq!(report.states, vec![TenantState::Selected, TenantState::ConnectionFailed]);
    assert!(report.classification.is_none());

    let missing = migrate_one(&server, &Tenant::new(7, "never_provisioned")).await;
    assert_eq!(missing.state(), TenantState::ConnectionFailed);
}

// ─── Multi-tenant runs ────────────────────────────────────────────────────────

fn mixed_tenants() -> Vec<(Tenant, MemoryDatabase, bool)> {
    vec![
        (Tenant::new(1, "acme"), MemoryDatabase::new(), false),
        (
            Tenant::new(2, "broken"),
            MemoryDatabase::new().reject_table("payroll_runs"),
            false,
        ),
        (Tenant::new(3, "legacy_co"), legacy_database(), false),
        (Tenant::new(4, "offline"), MemoryDatabase::new(), true),
    ]
}

fn server_with(tenants: &[(Tenant, MemoryDatabase, bool)], concurrency: usize) -> MemoryServer {
    let server = MemoryServer::new().with_concurrency(concurrency);
    for (tenant, db, unreachable) in tenants {
        server.insert(&tenant.database, db.clone());
        if *unreachable {
            server.mark_unreachable(&tenant.database);
        }
    }
    server
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for pos in 0..=rest.len() {
            let mut p = rest.clone();
            p.insert(pos, n - 1);
            out.push(p);
        }
    }
    out
}

#[tokio::test]
async fn tenants_do_not_affect_each_other_in_any_order() {
    let tenants = mixed_tenants();

    // Each tenant migrated on its own.
    let mut baseline = Vec::new();
    for entry in &tenants {
        let server = server_with(std::slice::from_ref(entry), 1);
        let report = migrate_one(&server, &entry.0).await;
        baseline.push((report.outcome, server.database(&entry.0.database).unwrap()));
    }
    assert_eq!(baseline[0].0, TenantOutcome::Migrated);
    assert_eq!(baseline[1].0, TenantOutcome::Failed);
    assert_eq!(baseline[2].0, TenantOutcome::Migrated);
    assert_eq!(baseline[3].0, TenantOutcome::Failed);

    for order in permutations(tenants.len()) {
        let ordered: Vec<_> = order.iter().map(|i| tenants[*i].clone()).collect();
        let server = server_with(&ordered, 1);
        let registry: Vec<Tenant> = ordered.iter().map(|(t, _, _)| t.clone()).collect();

        let reports = Orchestrator::new(&server, Planner::default())
            .migrate_all(&registry, 1, &no_progress)
            .await;

        for (report, index) in reports.iter().zip(&order) {
            let (outcome, expected) = &baseline[*index];
            assert_eq!(report.database, tenants[*index].0.database);
            assert_eq!(report.outcome, *outcome, "{order:?}");
            let actual = server.database(&report.database).unwrap();
            assert_eq!(actual.schema(), expected.schema(), "{order:?}");
            assert_eq!(actual.history(), expected.history(), "{order:?}");
        }
    }
}

#[tokio::test]
async fn bounded_concurrency_keeps_registry_order() {
    let tenants: Vec<(Tenant, MemoryDatabase, bool)> = (1..=8)
        .map(|i| {
            let db = if i % 3 == 0 {
                legacy_database()
            } else {
                MemoryDatabase::new()
            };
            (Tenant::new(i, format!("tenant_{i}")), db, i == 5)
        })
        .collect();
    let server = server_with(&tenants, 4);
    let registry: Vec<Tenant> = tenants.iter().map(|(t, _, _)| t.clone()).collect();

    let events = RefCell::new(Vec::new());
    let record = |p: Progress<'_>| {
        let event = match p {
            Progress::Started(t) => format!("start {}", t.id),
            Progress::Finished(r) => format!("finish {}", r.tenant_id),
        };
        events.borrow_mut().push(event);
    };

    let reports = Orchestrator::new(&server, Planner::default())
        .migrate_all(&registry, 4, &record)
        .await;

    let ids: Vec<i64> = reports.iter().map(|r| r.tenant_id).collect();
    assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    assert_eq!(events.borrow().len(), 16);

    let summary = RunSummary::from_reports(&reports);
    assert_eq!(summary.total, 8);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.migrated, 7);
    assert_eq!(reports[4].state(), TenantState::ConnectionFailed);
    assert_eq!(reports[2].plan, Some(PlanKind::Legacy));
}

#[tokio::test]
async fn every_connection_is_released_after_its_tenant() {
    let tenants = mixed_tenants();
    let server = server_with(&tenants, 4);
    let registry: Vec<Tenant> = tenants.iter().map(|(t, _, _)| t.clone()).collect();

    let open = RefCell::new(Vec::new());
    let record = |p: Progress<'_>| {
        if let Progress::Finished(_) = p {
            open.borrow_mut().push(server.open_connections());
        }
    };
    Orchestrator::new(&server, Planner::default())
        .migrate_all(&registry, 4, &record)
        .await;

    assert_eq!(server.open_connections(), 0);
    // Each tenant lets go before it reports back.
    assert!(open.borrow().iter().all(|n| *n < tenants.len()));
}

#[tokio::test]
async fn jobs_beyond_connector_limit_still_complete() {
    let tenants: Vec<(Tenant, MemoryDatabase, bool)> = (1..=3)
        .map(|i| (Tenant::new(i, format!("tenant_{i}")), MemoryDatabase::new(), false))
        .collect();
    let server = server_with(&tenants, 1);
    let registry: Vec<Tenant> = tenants.iter().map(|(t, _, _)| t.clone()).collect();

    let reports = Orchestrator::new(&server, Planner::default())
        .migrate_all(&registry, 16, &no_progress)
        .await;
    assert!(reports.iter().all(|r| r.outcome == TenantOutcome::Migrated));
}

// ─── Rollback ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rollback_reverts_the_latest_batch() {
    let catalog = Catalog::standard();
    let server = MemoryServer::new();
    server.insert("fresh_db", MemoryDatabase::new());
    let tenant = Tenant::new(1, "fresh_db");
    migrate_one(&server, &tenant).await;

    let conn = server.connect("fresh_db").await.unwrap();
    let reverted = rollback(&conn, &catalog, 1).await.unwrap();
    assert_eq!(reverted.len(), catalog.len());
    assert_eq!(reverted[0], catalog.units().last().unwrap().id);

    let db = server.database("fresh_db").unwrap();
    assert!(db.history().is_empty());
    let tables: Vec<&String> = db.schema().tables.keys().collect();
    assert_eq!(tables, vec![HISTORY_TABLE]);

    // Migrating again rebuilds everything as batch 1.
    let report = migrate_one(&server, &tenant).await;
    assert_eq!(report.outcome, TenantOutcome::Migrated);
    assert_eq!(report.applied(), catalog.len());
}

#[tokio::test]
async fn rollback_without_history_is_a_no_op() {
    let server = MemoryServer::new();
    server.insert("legacy_db", legacy_database());
    let conn = server.connect("legacy_db").await.unwrap();

    let reverted = rollback(&conn, &Catalog::standard(), 3).await.unwrap();
    assert!(reverted.is_empty());
    assert!(server.database("legacy_db").unwrap().executed().is_empty());
}
