use chrono::Utc;
use uuid::Uuid;

use crate::db::hr::HrStore;
use crate::error::{DbError, SeedError};
use crate::models::employee::Employee;
use crate::models::payroll::{format_cents, PayrollItem, PayrollPeriod, PayrollRates, PayrollRun};

/// Gross pay for employees without a positive salary: 2500.00.
pub const DEFAULT_SALARY_CENTS: i64 = 250_000;

pub const RUN_STATUS: &str = "processed";

/// `rate` percent of `cents`, rounded half away from zero.
pub fn percent_of(cents: i64, rate: f64) -> i64 {
    (cents as f64 * rate / 100.0).round() as i64
}

/// Pro-rata pay for days marked absent.
pub fn attendance_deduction(gross_cents: i64, absent_days: i64, working_days: i64) -> i64 {
    if working_days <= 0 || absent_days <= 0 {
        return 0;
    }
    let absent = absent_days.min(working_days) as i128;
    let working = working_days as i128;
    let numerator = gross_cents as i128 * absent;
    // Half away from zero, like `percent_of`.
    let rounded = (numerator.abs() * 2 + working) / (working * 2);
    (rounded * numerator.signum()) as i64
}

pub fn compute_item(
    run_id: Uuid,
    employee: &Employee,
    absent_days: i64,
    working_days: i64,
    rates: PayrollRates,
) -> PayrollItem {
    let gross = employee
        .salary_cents
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_SALARY_CENTS);
    let bonus = 0;
    let company_deduction = percent_of(gross, rates.deduction_rate);
    let company_tax = percent_of(gross, rates.tax_rate);
    let attendance = attendance_deduction(gross, absent_days, working_days);
    let deduction_total = company_deduction + attendance;
    let tax_total = company_tax;
    let adjustments = bonus - deduction_total - tax_total;

    PayrollItem {
        id: Uuid::new_v4(),
        payroll_run_id: run_id,
        employee_id: employee.id,
        gross_cents: gross,
        bonus_total_cents: bonus,
        company_deduction_cents: company_deduction,
        company_tax_cents: company_tax,
        attendance_deduction_cents: attendance,
        deduction_total_cents: deduction_total,
        tax_total_cents: tax_total,
        adjustments_total_cents: adjustments,
        net_cents: gross + adjustments,
    }
}

/// Aggregates items into their run. Totals are exact column sums.
pub fn build_run(run_id: Uuid, period: PayrollPeriod, items: &[PayrollItem]) -> PayrollRun {
    let sum = |f: fn(&PayrollItem) -> i64| items.iter().map(f).sum::<i64>();
    PayrollRun {
        id: run_id,
        month: period.month as i32,
        year: period.year,
        employee_count: items.len() as i32,
        total_gross_cents: sum(|i| i.gross_cents),
        total_bonus_cents: sum(|i| i.bonus_total_cents),
        total_deductions_cents: sum(|i| i.deduction_total_cents),
        total_tax_cents: sum(|i| i.tax_total_cents),
        total_attendance_deductions_cents: sum(|i| i.attendance_deduction_cents),
        total_net_cents: sum(|i| i.net_cents),
        status: RUN_STATUS.to_string(),
        created_at: Utc::now(),
    }
}

/// Creates the payroll run for `period`, or returns the existing one.
///
/// The boolean is `true` when a run was created. Items and run are written
/// in one transaction.
pub async fn seed_payroll_run<S: HrStore>(
    store: &S,
    employees: &[Employee],
    period: PayrollPeriod,
    rates: PayrollRates,
) -> Result<(PayrollRun, bool), SeedError> {
    if let Some(existing) = store.find_payroll_run(period).await? {
        tracing::info!("Payroll run for {period} already exists ({}), leaving it as is", existing.id);
        return Ok((existing, false));
    }

    let working_days = period.working_days().len() as i64;
    let run_id = Uuid::new_v4();
    let mut items = Vec::with_capacity(employees.len());
    for employee in employees {
        let absent = store.absent_days(employee.id, period).await?;
        items.push(compute_item(run_id, employee, absent, working_days, rates));
    }

    let run = build_run(run_id, period, &items);
    match store.insert_payroll_run(&run, &items).await {
        Ok(()) => {}
        Err(DbError::Duplicate { table }) => {
            // Another seeder committed this period after our lookup.
            let Some(existing) = store.find_payroll_run(period).await? else {
                return Err(DbError::Duplicate { table }.into());
            };
            tracing::warn!(
                "Payroll run for {period} was created concurrently ({}), using it",
                existing.id
            );
            return Ok((existing, false));
        }
        Err(err) => return Err(err.into()),
    }
    tracing::info!(
        "Created payroll run for {period}: {} employees, gross {}, net {}",
        run.employee_count,
        format_cents(run.total_gross_cents),
        format_cents(run.total_net_cents)
    );
    Ok((run, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(salary_cents: Option<i64>) -> Employee {
        Employee {
            id: Uuid::new_v4(),
            department_id: None,
            role_id: None,
            first_name: "Demo".into(),
            last_name: "Employee".into(),
            email: format!("{}@demo.test", Uuid::new_v4()),
            salary_cents,
        }
    }

    #[test]
    fn percentages_round_half_away_from_zero() {
        assert_eq!(percent_of(265_000, 5.0), 13_250);
        assert_eq!(percent_of(10, 5.0), 1); // 0.5 → 1
        assert_eq!(percent_of(-10, 5.0), -1);
        assert_eq!(percent_of(0, 5.0), 0);
    }

    #[test]
    fn attendance_deduction_is_pro_rata() {
        assert_eq!(attendance_deduction(230_000, 1, 23), 10_000);
        assert_eq!(attendance_deduction(100, 1, 3), 33);
        assert_eq!(attendance_deduction(100, 2, 3), 67);
        assert_eq!(attendance_deduction(100, 5, 3), 100);
        assert_eq!(attendance_deduction(100, 0, 3), 0);
        assert_eq!(attendance_deduction(100, 1, 0), 0);
    }

    #[test]
    fn missing_salary_uses_default() {
        let run_id = Uuid::new_v4();
        for salary in [None, Some(0), Some(-100)] {
            let item = compute_item(run_id, &employee(salary), 0, 22, PayrollRates::default());
            assert_eq!(item.gross_cents, DEFAULT_SALARY_CENTS);
        }
    }

    #[test]
    fn item_identities_hold() {
        let item = compute_item(
            Uuid::new_v4(),
            &employee(Some(333_333)),
            2,
            21,
            PayrollRates {
                tax_rate: 7.5,
                deduction_rate: 1.25,
            },
        );
        assert_eq!(
            item.deduction_total_cents,
            item.company_deduction_cents + item.attendance_deduction_cents
        );
        assert_eq!(
            item.adjustments_total_cents,
            item.bonus_total_cents - item.deduction_total_cents - item.tax_total_cents
        );
        assert_eq!(item.net_cents, item.gross_cents + item.adjustments_total_cents);
    }

    #[test]
    fn net_total_stays_within_a_cent_per_employee() {
        let cases: &[(&[i64], f64, f64)] = &[
            (&[265_000, 280_000, 295_000], 5.0, 2.0),
            (&[123_457, 99_999, 1], 7.5, 1.25),
            (&[333_333; 7], 12.345, 3.3),
            (&[250_001, 410_099, 87_655, 1_000_003], 0.5, 0.75),
            (&[199], 33.3, 33.3),
            (&[15, 25, 35, 45, 55], 10.0, 0.0),
        ];
        let period = PayrollPeriod::new(3, 2025).unwrap();

        for &(salaries, tax_rate, deduction_rate) in cases {
            let rates = PayrollRates {
                tax_rate,
                deduction_rate,
            };
            let run_id = Uuid::new_v4();
            let items: Vec<PayrollItem> = salaries
                .iter()
                .map(|s| compute_item(run_id, &employee(Some(*s)), 0, 21, rates))
                .collect();
            let run = build_run(run_id, period, &items);

            let gross: i64 = salaries.iter().sum();
            let expected = gross as f64 * (1.0 - (tax_rate + deduction_rate) / 100.0);
            let drift = (run.total_net_cents as f64 - expected).abs();
            assert_eq!(run.total_gross_cents, gross);
            assert!(
                drift <= salaries.len() as f64,
                "{salaries:?} at {tax_rate}/{deduction_rate}: net {} vs {expected}",
                run.total_net_cents
            );
        }
    }

    #[test]
    fn three_employee_run_totals() {
        let run_id = Uuid::new_v4();
        let period = PayrollPeriod::new(1, 2025).unwrap();
        let items: Vec<PayrollItem> = [265_000, 280_000, 295_000]
            .into_iter()
            .map(|s| compute_item(run_id, &employee(Some(s)), 0, 23, PayrollRates::default()))
            .collect();
        let run = build_run(run_id, period, &items);
        assert_eq!(run.employee_count, 3);
        assert_eq!(run.total_gross_cents, 840_000);
        assert_eq!(run.total_deductions_cents, 16_800);
        assert_eq!(run.total_tax_cents, 42_000);
        assert_eq!(run.total_net_cents, 781_200);
    }
}
