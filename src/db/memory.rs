//! In-process tenant databases.
//!
//! Implements the same connection, connector and HR store traits as the
//! Postgres handle so the prober, planner, executor, orchestrator and seeder
//! can be exercised without a server. DDL is applied strictly: creating a
//! table that exists, altering a missing table, or referencing a missing
//! table is an error, the way an unguarded statement would fail in Postgres.
//! Faults can be injected per database (unreachable) or per table
//! (every statement touching it is rejected).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::hr::HrStore;
use super::schema::SchemaOp;
use super::{HistoryRecord, TenantConnection, TenantConnector, HISTORY_TABLE};
use crate::error::DbError;
use crate::models::employee::{AttendanceRecord, AttendanceStatus, Employee, NewEmployee};
use crate::models::payroll::{PayrollItem, PayrollPeriod, PayrollRates, PayrollRun};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tables, columns and indexes of a database, without data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, Vec<String>>,
    pub indexes: BTreeMap<String, String>,
}

impl SchemaSnapshot {
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|cols| cols.iter().any(|c| c == column))
    }
}

#[derive(Debug, Clone, Default)]
struct HrData {
    roles: Vec<(Uuid, String)>,
    departments: Vec<(Uuid, String)>,
    employees: Vec<Employee>,
    password_hashes: HashMap<Uuid, String>,
    attendance: Vec<AttendanceRecord>,
    rates: Option<PayrollRates>,
    runs: Vec<PayrollRun>,
    items: Vec<PayrollItem>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    schema: SchemaSnapshot,
    history: Vec<HistoryRecord>,
    rejected_tables: BTreeSet<String>,
    stale_run_lookups: u32,
    executed: Vec<SchemaOp>,
    hr: HrData,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-existing table, as if created out-of-band.
    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        self.schema.tables.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Every statement touching `table` fails.
    pub fn reject_table(mut self, table: &str) -> Self {
        self.rejected_tables.insert(table.to_string());
        self
    }

    /// The next `n` payroll run lookups come back empty, as for a reader
    /// that has not seen another writer's commit yet.
    pub fn stale_run_lookups(mut self, n: u32) -> Self {
        self.stale_run_lookups = n;
        self
    }

    pub fn with_payroll_rates(mut self, rates: PayrollRates) -> Self {
        self.hr.rates = Some(rates);
        self
    }

    pub fn schema(&self) -> &SchemaSnapshot {
        &self.schema
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Every schema operation that reached this database, in order.
    pub fn executed(&self) -> &[SchemaOp] {
        &self.executed
    }

    pub fn employees(&self) -> &[Employee] {
        &self.hr.employees
    }

    pub fn attendance(&self) -> &[AttendanceRecord] {
        &self.hr.attendance
    }

    pub fn payroll_runs(&self) -> &[PayrollRun] {
        &self.hr.runs
    }

    pub fn payroll_items(&self) -> &[PayrollItem] {
        &self.hr.items
    }

    pub fn password_hash(&self, employee_id: Uuid) -> Option<&str> {
        self.hr.password_hashes.get(&employee_id).map(String::as_str)
    }

    fn check_table(&self, table: &str) -> Result<(), DbError> {
        if self.rejected_tables.contains(table) {
            return Err(DbError::Rejected {
                table: table.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn require_table(&self, table: &str) -> Result<(), DbError> {
        if self.schema.tables.contains_key(table) {
            Ok(())
        } else {
            Err(DbError::Rejected {
                table: table.to_string(),
                reason: format!("relation \"{table}\" does not exist"),
            })
        }
    }

    fn columns_mut(&mut self, table: &str) -> Result<&mut Vec<String>, DbError> {
        self.schema
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::Rejected {
                table: table.to_string(),
                reason: format!("relation \"{table}\" does not exist"),
            })
    }

    fn apply(&mut self, op: &SchemaOp) -> Result<(), DbError> {
        let table = op.table();
        self.check_table(table)?;
        for referenced in op.referenced_tables() {
            self.require_table(referenced)?;
        }

        let rejected = |reason: String| DbError::Rejected {
            table: table.to_string(),
            reason,
        };

        match *op {
            SchemaOp::CreateTable { columns, .. } => {
                if self.schema.tables.contains_key(table) {
                    return Err(rejected(format!("relation \"{table}\" already exists")));
                }
                self.schema.tables.insert(
                    table.to_string(),
                    columns.iter().map(|c| c.name.to_string()).collect(),
                );
            }
            SchemaOp::AddColumn { column, .. } => {
                let cols = self.columns_mut(table)?;
                if cols.iter().any(|c| c == column.name) {
                    return Err(rejected(format!("column \"{}\" already exists", column.name)));
                }
                cols.push(column.name.to_string());
            }
            SchemaOp::RenameColumn { from, to, .. } => {
                let cols = self.columns_mut(table)?;
                if cols.iter().any(|c| c == to) {
                    return Err(rejected(format!("column \"{to}\" already exists")));
                }
                let col = cols
                    .iter_mut()
                    .find(|c| c.as_str() == from)
                    .ok_or_else(|| rejected(format!("column \"{from}\" does not exist")))?;
                *col = to.to_string();
            }
            SchemaOp::DropColumn { column, .. } => {
                let cols = self.columns_mut(table)?;
                let before = cols.len();
                cols.retain(|c| c != column);
                if cols.len() == before {
                    return Err(rejected(format!("column \"{column}\" does not exist")));
                }
            }
            SchemaOp::DropTable { .. } => {
                if self.schema.tables.remove(table).is_none() {
                    return Err(rejected(format!("relation \"{table}\" does not exist")));
                }
                self.schema.indexes.retain(|_, t| t.as_str() != table);
            }
            SchemaOp::CreateIndex { name, columns, .. } => {
                if self.schema.indexes.contains_key(name) {
                    return Err(rejected(format!("relation \"{name}\" already exists")));
                }
                let cols = self.columns_mut(table)?;
                if let Some(missing) = columns.iter().find(|c| !cols.iter().any(|x| x == *c)) {
                    return Err(rejected(format!("column \"{missing}\" does not exist")));
                }
                self.schema
                    .indexes
                    .insert(name.to_string(), table.to_string());
            }
            SchemaOp::DropIndex { name, .. } => {
                if self.schema.indexes.remove(name).is_none() {
                    return Err(rejected(format!("index \"{name}\" does not exist")));
                }
            }
        }

        self.executed.push(*op);
        Ok(())
    }
}

// ─── Connections ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemoryConnection {
    database: String,
    db: Arc<Mutex<MemoryDatabase>>,
}

impl MemoryConnection {
    fn with_db<R>(&self, f: impl FnOnce(&mut MemoryDatabase) -> R) -> R {
        f(&mut lock(&self.db))
    }
}

/// A set of named in-memory databases, handed out like a database server.
pub struct MemoryServer {
    databases: Mutex<HashMap<String, Arc<Mutex<MemoryDatabase>>>>,
    unreachable: Mutex<HashSet<String>>,
    open: Mutex<HashSet<String>>,
    max_live: usize,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            open: Mutex::new(HashSet::new()),
            max_live: 1,
        }
    }

    /// Allows up to `n` tenants to be processed at once.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_live = n.max(1);
        self
    }

    pub fn insert(&self, name: &str, db: MemoryDatabase) {
        lock(&self.databases).insert(name.to_string(), Arc::new(Mutex::new(db)));
    }

    pub fn mark_unreachable(&self, name: &str) {
        lock(&self.unreachable).insert(name.to_string());
    }

    /// Databases connected to and not yet released.
    pub fn open_connections(&self) -> usize {
        lock(&self.open).len()
    }

    /// Copy of the current state of `name`.
    pub fn database(&self, name: &str) -> Option<MemoryDatabase> {
        lock(&self.databases).get(name).map(|db| lock(db).clone())
    }
}

impl TenantConnector for MemoryServer {
    type Connection = MemoryConnection;

    async fn connect(&self, database: &str) -> Result<MemoryConnection, DbError> {
        if lock(&self.unreachable).contains(database) {
            return Err(DbError::Unavailable {
                database: database.to_string(),
                reason: "connection refused".into(),
            });
        }
        let db = lock(&self.databases)
            .get(database)
            .cloned()
            .ok_or_else(|| DbError::Unavailable {
                database: database.to_string(),
                reason: format!("database \"{database}\" does not exist"),
            })?;
        lock(&self.open).insert(database.to_string());
        Ok(MemoryConnection {
            database: database.to_string(),
            db,
        })
    }

    async fn release(&self, database: &str) {
        lock(&self.open).remove(database);
    }

    fn max_concurrency(&self) -> usize {
        self.max_live
    }
}

impl TenantConnection for MemoryConnection {
    fn database(&self) -> &str {
        &self.database
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        Ok(self.with_db(|db| db.schema.tables.keys().cloned().collect()))
    }

    async fn has_table(&self, table: &str) -> Result<bool, DbError> {
        Ok(self.with_db(|db| db.schema.tables.contains_key(table)))
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool, DbError> {
        Ok(self.with_db(|db| db.schema.has_column(table, column)))
    }

    async fn has_index(&self, index: &str) -> Result<bool, DbError> {
        Ok(self.with_db(|db| db.schema.indexes.contains_key(index)))
    }

    async fn execute(&self, op: &SchemaOp) -> Result<(), DbError> {
        self.with_db(|db| db.apply(op))
    }

    async fn ensure_history_table(&self) -> Result<(), DbError> {
        self.with_db(|db| {
            db.check_table(HISTORY_TABLE)?;
            let cols = db.schema.tables.entry(HISTORY_TABLE.to_string()).or_default();
            for col in ["id", "migration", "batch", "checksum", "applied_at"] {
                if !cols.iter().any(|c| c == col) {
                    cols.push(col.to_string());
                }
            }
            Ok(())
        })
    }

    async fn applied_migrations(&self) -> Result<Vec<HistoryRecord>, DbError> {
        self.with_db(|db| {
            db.require_table(HISTORY_TABLE)?;
            let mut records = db.history.clone();
            records.sort_by_key(|r| r.batch);
            Ok(records)
        })
    }

    async fn record_migration(&self, record: &HistoryRecord) -> Result<(), DbError> {
        self.with_db(|db| {
            db.check_table(HISTORY_TABLE)?;
            db.require_table(HISTORY_TABLE)?;
            db.history.push(record.clone());
            Ok(())
        })
    }

    async fn forget_migration(&self, migration: &str) -> Result<(), DbError> {
        self.with_db(|db| {
            db.require_table(HISTORY_TABLE)?;
            db.history.retain(|r| r.migration != migration);
            Ok(())
        })
    }
}

// ─── HR data ──────────────────────────────────────────────────────────────────

fn upsert_named(rows: &mut Vec<(Uuid, String)>, name: &str) -> Uuid {
    if let Some((id, _)) = rows.iter().find(|(_, n)| n == name) {
        return *id;
    }
    let id = Uuid::new_v4();
    rows.push((id, name.to_string()));
    id
}

fn in_period(date: chrono::NaiveDate, period: PayrollPeriod) -> bool {
    date >= period.first_day() && date <= period.last_day()
}

impl HrStore for MemoryConnection {
    async fn upsert_role(&self, name: &str) -> Result<Uuid, DbError> {
        self.with_db(|db| {
            db.check_table("roles")?;
            db.require_table("roles")?;
            Ok(upsert_named(&mut db.hr.roles, name))
        })
    }

    async fn upsert_department(&self, name: &str) -> Result<Uuid, DbError> {
        self.with_db(|db| {
            db.check_table("departments")?;
            db.require_table("departments")?;
            Ok(upsert_named(&mut db.hr.departments, name))
        })
    }

    async fn upsert_employee(&self, employee: &NewEmployee) -> Result<Employee, DbError> {
        self.with_db(|db| {
            db.check_table("employees")?;
            db.require_table("employees")?;
            let row = match db.hr.employees.iter_mut().find(|e| e.email == employee.email) {
                Some(existing) => {
                    existing.department_id = Some(employee.department_id);
                    existing.role_id = Some(employee.role_id);
                    existing.first_name = employee.first_name.clone();
                    existing.last_name = employee.last_name.clone();
                    existing.salary_cents = Some(employee.salary_cents);
                    existing.clone()
                }
                None => {
                    let row = Employee {
                        id: Uuid::new_v4(),
                        department_id: Some(employee.department_id),
                        role_id: Some(employee.role_id),
                        first_name: employee.first_name.clone(),
                        last_name: employee.last_name.clone(),
                        email: employee.email.clone(),
                        salary_cents: Some(employee.salary_cents),
                    };
                    db.hr.employees.push(row.clone());
                    row
                }
            };
            db.hr
                .password_hashes
                .insert(row.id, employee.password_hash.clone());
            Ok(row)
        })
    }

    async fn delete_attendance(
        &self,
        employee_ids: &[Uuid],
        period: PayrollPeriod,
    ) -> Result<u64, DbError> {
        self.with_db(|db| {
            db.check_table("attendances")?;
            let before = db.hr.attendance.len();
            db.hr.attendance.retain(|a| {
                !(employee_ids.contains(&a.employee_id) && in_period(a.date, period))
            });
            Ok((before - db.hr.attendance.len()) as u64)
        })
    }

    async fn insert_attendance(&self, records: &[AttendanceRecord]) -> Result<u64, DbError> {
        self.with_db(|db| {
            db.check_table("attendances")?;
            db.require_table("attendances")?;
            let mut inserted = 0;
            for record in records {
                let exists = db
                    .hr
                    .attendance
                    .iter()
                    .any(|a| a.employee_id == record.employee_id && a.date == record.date);
                if !exists {
                    db.hr.attendance.push(record.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }

    async fn absent_days(&self, employee_id: Uuid, period: PayrollPeriod) -> Result<i64, DbError> {
        self.with_db(|db| {
            Ok(db
                .hr
                .attendance
                .iter()
                .filter(|a| {
                    a.employee_id == employee_id
                        && a.status == AttendanceStatus::Absent
                        && in_period(a.date, period)
                })
                .count() as i64)
        })
    }

    async fn payroll_rates(&self) -> Result<Option<PayrollRates>, DbError> {
        Ok(self.with_db(|db| db.hr.rates))
    }

    async fn find_payroll_run(&self, period: PayrollPeriod) -> Result<Option<PayrollRun>, DbError> {
        self.with_db(|db| {
            db.check_table("payroll_runs")?;
            if db.stale_run_lookups > 0 {
                db.stale_run_lookups -= 1;
                return Ok(None);
            }
            Ok(db
                .hr
                .runs
                .iter()
                .find(|r| r.period() == period)
                .cloned())
        })
    }

    async fn payroll_items(&self, run_id: Uuid) -> Result<Vec<PayrollItem>, DbError> {
        Ok(self.with_db(|db| {
            db.hr
                .items
                .iter()
                .filter(|i| i.payroll_run_id == run_id)
                .cloned()
                .collect()
        }))
    }

    async fn insert_payroll_run(&self, run: &PayrollRun, items: &[PayrollItem]) -> Result<(), DbError> {
        self.with_db(|db| {
            // All checks happen before any write, so a failure leaves nothing behind.
            for table in ["payroll_runs", "payroll_items"] {
                db.check_table(table)?;
                db.require_table(table)?;
            }
            if db.hr.runs.iter().any(|r| r.period() == run.period()) {
                return Err(DbError::Duplicate {
                    table: "payroll_runs".into(),
                });
            }
            db.hr.runs.push(run.clone());
            db.hr.items.extend_from_slice(items);
            Ok(())
        })
    }
}
