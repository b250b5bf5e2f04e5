use uuid::Uuid;

use super::tenant::ConnectionHandle;
use crate::error::DbError;
use crate::models::employee::{AttendanceRecord, Employee, NewEmployee};
use crate::models::payroll::{PayrollItem, PayrollPeriod, PayrollRates, PayrollRun};

fn unique_violation(table: &str) -> impl FnOnce(sqlx::Error) -> DbError + '_ {
    move |err| {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return DbError::Duplicate {
                    table: table.to_string(),
                };
            }
        }
        DbError::Sqlx(err)
    }
}

/// HR rows the demo seeder reads and writes in a tenant database.
#[allow(async_fn_in_trait)]
pub trait HrStore {
    async fn upsert_role(&self, name: &str) -> Result<Uuid, DbError>;

    async fn upsert_department(&self, name: &str) -> Result<Uuid, DbError>;

    /// Insert-or-update keyed on email.
    async fn upsert_employee(&self, employee: &NewEmployee) -> Result<Employee, DbError>;

    async fn delete_attendance(
        &self,
        employee_ids: &[Uuid],
        period: PayrollPeriod,
    ) -> Result<u64, DbError>;

    /// Inserts rows whose (employee_id, date) is not taken yet.
    async fn insert_attendance(&self, records: &[AttendanceRecord]) -> Result<u64, DbError>;

    async fn absent_days(&self, employee_id: Uuid, period: PayrollPeriod) -> Result<i64, DbError>;

    async fn payroll_rates(&self) -> Result<Option<PayrollRates>, DbError>;

    async fn find_payroll_run(&self, period: PayrollPeriod) -> Result<Option<PayrollRun>, DbError>;

    async fn payroll_items(&self, run_id: Uuid) -> Result<Vec<PayrollItem>, DbError>;

    /// Writes the run and all of its items atomically. A run already stored
    /// for the same period fails with [`DbError::Duplicate`].
    async fn insert_payroll_run(&self, run: &PayrollRun, items: &[PayrollItem]) -> Result<(), DbError>;
}

impl HrStore for ConnectionHandle {
    async fn upsert_role(&self, name: &str) -> Result<Uuid, DbError> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO roles (id, name, guard_name)
             VALUES ($1, $2, 'web')
             ON CONFLICT (name) DO UPDATE SET updated_at = NOW()
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    async fn upsert_department(&self, name: &str) -> Result<Uuid, DbError> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO departments (id, name)
             VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET updated_at = NOW()
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    async fn upsert_employee(&self, employee: &NewEmployee) -> Result<Employee, DbError> {
        let row = sqlx::query_as::<_, Employee>(
            "INSERT INTO employees
               (id, department_id, role_id, first_name, last_name, email, salary_cents, password_hash)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (email) DO UPDATE SET
               department_id = EXCLUDED.department_id,
               role_id       = EXCLUDED.role_id,
               first_name    = EXCLUDED.first_name,
               last_name     = EXCLUDED.last_name,
               salary_cents  = EXCLUDED.salary_cents,
               password_hash = EXCLUDED.password_hash,
               updated_at    = NOW()
             RETURNING id, department_id, role_id, first_name, last_name, email, salary_cents",
        )
        .bind(Uuid::new_v4())
        .bind(employee.department_id)
        .bind(employee.role_id)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(employee.salary_cents)
        .bind(&employee.password_hash)
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    async fn delete_attendance(
        &self,
        employee_ids: &[Uuid],
        period: PayrollPeriod,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM attendances
             WHERE employee_id = ANY($1) AND date BETWEEN $2 AND $3",
        )
        .bind(employee_ids)
        .bind(period.first_day())
        .bind(period.last_day())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_attendance(&self, records: &[AttendanceRecord]) -> Result<u64, DbError> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO attendances
                   (id, employee_id, date, check_in, check_out, status, check_in_method)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (employee_id, date) DO NOTHING",
            )
            .bind(record.id)
            .bind(record.employee_id)
            .bind(record.date)
            .bind(record.check_in)
            .bind(record.check_out)
            .bind(record.status.as_str())
            .bind(record.check_in_method)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn absent_days(&self, employee_id: Uuid, period: PayrollPeriod) -> Result<i64, DbError> {
        let days: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attendances
             WHERE employee_id = $1 AND status = 'absent' AND date BETWEEN $2 AND $3",
        )
        .bind(employee_id)
        .bind(period.first_day())
        .bind(period.last_day())
        .fetch_one(self.pool())
        .await?;
        Ok(days)
    }

    async fn payroll_rates(&self) -> Result<Option<PayrollRates>, DbError> {
        let row: Option<(f64, f64)> = sqlx::query_as(
            "SELECT tax_rate, deduction_rate FROM payroll_settings
             ORDER BY updated_at DESC
             LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(tax_rate, deduction_rate)| PayrollRates {
            tax_rate,
            deduction_rate,
        }))
    }

    async fn find_payroll_run(&self, period: PayrollPeriod) -> Result<Option<PayrollRun>, DbError> {
        let run = sqlx::query_as::<_, PayrollRun>(
            "SELECT id, month, year, employee_count, total_gross_cents, total_bonus_cents,
                    total_deductions_cents, total_tax_cents, total_attendance_deductions_cents,
                    total_net_cents, status, created_at
             FROM payroll_runs
             WHERE month = $1 AND year = $2",
        )
        .bind(period.month as i32)
        .bind(period.year)
        .fetch_optional(self.pool())
        .await?;
        Ok(run)
    }

    async fn payroll_items(&self, run_id: Uuid) -> Result<Vec<PayrollItem>, DbError> {
        let items = sqlx::query_as::<_, PayrollItem>(
            "SELECT id, payroll_run_id, employee_id, gross_cents, bonus_total_cents,
                    company_deduction_cents, company_tax_cents, attendance_deduction_cents,
                    deduction_total_cents, tax_total_cents, adjustments_total_cents, net_cents
             FROM payroll_items
             WHERE payroll_run_id = $1
             ORDER BY created_at, id",
        )
        .bind(run_id)
        .fetch_all(self.pool())
        .await?;
        Ok(items)
    }

    async fn insert_payroll_run(&self, run: &PayrollRun, items: &[PayrollItem]) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO payroll_runs
               (id, month, year, employee_count, total_gross_cents, total_bonus_cents,
                total_deductions_cents, total_tax_cents, total_attendance_deductions_cents,
                total_net_cents, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(run.id)
        .bind(run.month)
        .bind(run.year)
        .bind(run.employee_count)
        .bind(run.total_gross_cents)
        .bind(run.total_bonus_cents)
        .bind(run.total_deductions_cents)
        .bind(run.total_tax_cents)
        .bind(run.total_attendance_deductions_cents)
        .bind(run.total_net_cents)
        .bind(&run.status)
        .execute(&mut *tx)
        .await
        .map_err(unique_violation("payroll_runs"))?;

        for item in items {
            sqlx::query(
                "INSERT INTO payroll_items
                   (id, payroll_run_id, employee_id, gross_cents, bonus_total_cents,
                    company_deduction_cents, company_tax_cents, attendance_deduction_cents,
                    deduction_total_cents, tax_total_cents, adjustments_total_cents, net_cents)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(item.id)
            .bind(item.payroll_run_id)
            .bind(item.employee_id)
            .bind(item.gross_cents)
            .bind(item.bonus_total_cents)
            .bind(item.company_deduction_cents)
            .bind(item.company_tax_cents)
            .bind(item.attendance_deduction_cents)
            .bind(item.deduction_total_cents)
            .bind(item.tax_total_cents)
            .bind(item.adjustments_total_cents)
            .bind(item.net_cents)
            .execute(&mut *tx)
            .await?;
        }

        // Dropping `tx` on an early return above rolls everything back.
        tx.commit().await?;
        Ok(())
    }
}
