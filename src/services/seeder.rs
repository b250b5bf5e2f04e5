//! Demo data for one tenant database.
//!
//! Everything is keyed on natural keys (role and department names, employee
//! email, attendance (employee, date), payroll (month, year)), so seeding the
//! same tenant and period twice leaves the data as it was after the first run.

use chrono::{Datelike, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::hr::HrStore;
use crate::db::TenantConnection;
use crate::error::SeedError;
use crate::models::employee::{AttendanceRecord, AttendanceStatus, Employee, NewEmployee};
use crate::models::payroll::{PayrollPeriod, PayrollRates, PayrollRun};
use crate::services::payroll::seed_payroll_run;

/// bcrypt cost for demo accounts; low to keep seeding fast.
const HASH_COST: u32 = 10;

pub const MAX_DEMO_EMPLOYEES: u32 = 500;

const ADMIN_ROLE: &str = "hr-admin";
const EMPLOYEE_ROLE: &str = "employee";

const DEPARTMENTS: [&str; 3] = ["Engineering", "Operations", "People"];

const FIRST_NAMES: [&str; 8] = [
    "Amina", "Bruno", "Chloe", "Dario", "Elif", "Farid", "Greta", "Hugo",
];
const LAST_NAMES: [&str; 6] = ["Okafor", "Silva", "Nakamura", "Rossi", "Kowalski", "Haddad"];

/// Required tables and the columns the seeder writes that later catalog
/// units add.
const REQUIRED: &[(&str, &[&str])] = &[
    ("roles", &["name"]),
    ("departments", &["name"]),
    ("employees", &["email", "role_id", "salary_cents", "password_hash"]),
    ("attendances", &["employee_id", "date", "check_in_method"]),
];

const REQUIRED_FOR_PAYROLL: &[(&str, &[&str])] = &[
    ("payroll_runs", &["month", "year", "total_attendance_deductions_cents"]),
    ("payroll_items", &["payroll_run_id", "attendance_deduction_cents"]),
];

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub employees: u32,
    pub month: u32,
    pub year: i32,
    pub with_payroll: bool,
    pub reset_attendance: bool,
}

impl Default for SeedOptions {
    fn default() -> Self {
        let today = Utc::now().date_naive();
        Self {
            employees: 10,
            month: today.month(),
            year: today.year(),
            with_payroll: true,
            reset_attendance: false,
        }
    }
}

impl SeedOptions {
    /// Checks every option; nothing is written when this fails.
    pub fn validate(&self) -> Result<PayrollPeriod, SeedError> {
        if !(1..=MAX_DEMO_EMPLOYEES).contains(&self.employees) {
            return Err(SeedError::Validation(format!(
                "employees must be between 1 and {MAX_DEMO_EMPLOYEES}, got {}",
                self.employees
            )));
        }
        PayrollPeriod::new(self.month, self.year)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub database: String,
    pub period: PayrollPeriod,
    pub employees: usize,
    pub attendance_deleted: u64,
    pub attendance_inserted: u64,
    pub payroll_run: Option<PayrollRun>,
    pub payroll_created: bool,
}

/// Salary of the `index`-th demo employee (1-based): 2500.00 + 150.00 each.
pub fn demo_salary_cents(index: u32) -> i64 {
    250_000 + 15_000 * index as i64
}

pub fn demo_email(index: u32, database: &str) -> String {
    format!("employee{index}@{database}.demo")
}

/// Deterministic attendance for one employee over the period's working days.
/// Nobody is marked absent, so demo payroll carries no attendance deductions.
pub fn demo_attendance(
    employee_index: u32,
    employee_id: Uuid,
    period: PayrollPeriod,
) -> Vec<AttendanceRecord> {
    let check_out = NaiveTime::from_hms_opt(17, 30, 0).unwrap_or_default();
    period
        .working_days()
        .into_iter()
        .enumerate()
        .map(|(day, date)| {
            let late = (employee_index as usize + day) % 7 == 0;
            let (status, check_in) = if late {
                (AttendanceStatus::Late, NaiveTime::from_hms_opt(9, 20, 0))
            } else {
                (AttendanceStatus::Present, NaiveTime::from_hms_opt(8, 55, 0))
            };
            AttendanceRecord {
                id: Uuid::new_v4(),
                employee_id,
                date,
                check_in,
                check_out: Some(check_out),
                status,
                check_in_method: if employee_index % 2 == 0 { "face" } else { "manual" },
            }
        })
        .collect()
}

pub struct DemoSeeder<'a, S> {
    store: &'a S,
    password: String,
}

impl<'a, S: TenantConnection + HrStore> DemoSeeder<'a, S> {
    pub fn new(store: &'a S, password: impl Into<String>) -> Self {
        Self {
            store,
            password: password.into(),
        }
    }

    async fn check_tables(&self, with_payroll: bool) -> Result<(), SeedError> {
        let mut missing = Vec::new();
        let groups = if with_payroll {
            [REQUIRED, REQUIRED_FOR_PAYROLL].concat()
        } else {
            REQUIRED.to_vec()
        };
        for (table, columns) in groups {
            if !self.store.has_table(table).await? {
                missing.push(table.to_string());
                continue;
            }
            for column in columns {
                if !self.store.has_column(table, column).await? {
                    missing.push(format!("{table}.{column}"));
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SeedError::MissingTables {
                database: self.store.database().to_string(),
                tables: missing,
            })
        }
    }

    async fn payroll_rates(&self) -> Result<PayrollRates, SeedError> {
        if !self.store.has_table("payroll_settings").await? {
            return Ok(PayrollRates::default());
        }
        Ok(self.store.payroll_rates().await?.unwrap_or_default())
    }

    pub async fn seed(&self, options: &SeedOptions) -> Result<SeedSummary, SeedError> {
        let period = options.validate()?;
        let database = self.store.database().to_string();
        self.check_tables(options.with_payroll).await?;

        tracing::info!("Seeding {database} for {period}");
        let password_hash = bcrypt::hash(&self.password, HASH_COST)?;

        let admin_role = self.store.upsert_role(ADMIN_ROLE).await?;
        let employee_role = self.store.upsert_role(EMPLOYEE_ROLE).await?;

        let mut departments = Vec::with_capacity(DEPARTMENTS.len());
        for name in DEPARTMENTS {
            departments.push(self.store.upsert_department(name).await?);
        }

        tracing::debug!("Upserting {} employees", options.employees);
        let mut employees: Vec<(u32, Employee)> = Vec::with_capacity(options.employees as usize);
        for index in 1..=options.employees {
            let slot = (index - 1) as usize;
            let employee = NewEmployee {
                department_id: departments[slot % departments.len()],
                role_id: if index == 1 { admin_role } else { employee_role },
                first_name: FIRST_NAMES[slot % FIRST_NAMES.len()].to_string(),
                last_name: LAST_NAMES[slot % LAST_NAMES.len()].to_string(),
                email: demo_email(index, &database),
                salary_cents: demo_salary_cents(index),
                password_hash: password_hash.clone(),
            };
            employees.push((index, self.store.upsert_employee(&employee).await?));
        }

        let ids: Vec<Uuid> = employees.iter().map(|(_, e)| e.id).collect();
        let attendance_deleted = if options.reset_attendance {
            let deleted = self.store.delete_attendance(&ids, period).await?;
            tracing::info!("Removed {deleted} attendance rows for {period}");
            deleted
        } else {
            0
        };

        let records: Vec<AttendanceRecord> = employees
            .iter()
            .flat_map(|(index, e)| demo_attendance(*index, e.id, period))
            .collect();
        let attendance_inserted = self.store.insert_attendance(&records).await?;
        tracing::debug!("Inserted {attendance_inserted} attendance rows");

        let (payroll_run, payroll_created) = if options.with_payroll {
            let rates = self.payroll_rates().await?;
            let staff: Vec<Employee> = employees.into_iter().map(|(_, e)| e).collect();
            let (run, created) = seed_payroll_run(self.store, &staff, period, rates).await?;
            (Some(run), created)
        } else {
            (None, false)
        };

        tracing::info!("Seeded demo data for {database} ({period})");
        Ok(SeedSummary {
            database,
            period,
            employees: ids.len(),
            attendance_deleted,
            attendance_inserted,
            payroll_run,
            payroll_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salaries_step_by_150() {
        let salaries: Vec<i64> = (1..=3).map(demo_salary_cents).collect();
        assert_eq!(salaries, vec![265_000, 280_000, 295_000]);
    }

    #[test]
    fn options_are_validated() {
        let mut options = SeedOptions {
            employees: 3,
            month: 1,
            year: 2025,
            with_payroll: true,
            reset_attendance: false,
        };
        assert!(options.validate().is_ok());

        options.employees = 0;
        assert!(matches!(options.validate(), Err(SeedError::Validation(_))));

        options.employees = 3;
        options.month = 13;
        assert!(matches!(options.validate(), Err(SeedError::Validation(_))));

        options.month = 1;
        options.year = 1999;
        assert!(matches!(options.validate(), Err(SeedError::Validation(_))));
    }

    #[test]
    fn attendance_covers_working_days_without_absences() {
        let period = PayrollPeriod::new(1, 2025).unwrap();
        let records = demo_attendance(1, Uuid::new_v4(), period);
        assert_eq!(records.len(), 23);
        assert!(records.iter().all(|r| r.status != AttendanceStatus::Absent));
        assert!(records.iter().any(|r| r.status == AttendanceStatus::Late));
    }
}
