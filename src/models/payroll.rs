use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::SeedError;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

/// A calendar month a payroll run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayrollPeriod {
    pub month: u32,
    pub year: i32,
}

impl PayrollPeriod {
    pub fn new(month: u32, year: i32) -> Result<Self, SeedError> {
        if !(1..=12).contains(&month) {
            return Err(SeedError::Validation(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(SeedError::Validation(format!(
                "year must be between {MIN_YEAR} and {MAX_YEAR}, got {year}"
            )));
        }
        Ok(Self { month, year })
    }

    pub fn first_day(&self) -> NaiveDate {
        // Month and year are range-checked in `new`.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1).unwrap_or_default() - Duration::days(1)
    }

    /// Monday to Friday dates of the month, in order.
    pub fn working_days(&self) -> Vec<NaiveDate> {
        self.first_day()
            .iter_days()
            .take_while(|d| d.month() == self.month)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .collect()
    }
}

impl std::fmt::Display for PayrollPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Percentages applied to gross pay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PayrollRates {
    pub tax_rate: f64,
    pub deduction_rate: f64,
}

impl Default for PayrollRates {
    fn default() -> Self {
        Self {
            tax_rate: 5.0,
            deduction_rate: 2.0,
        }
    }
}

/// Per-employee payroll line. All amounts are in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PayrollItem {
    pub id: Uuid,
    pub payroll_run_id: Uuid,
    pub employee_id: Uuid,
    pub gross_cents: i64,
    pub bonus_total_cents: i64,
    pub company_deduction_cents: i64,
    pub company_tax_cents: i64,
    pub attendance_deduction_cents: i64,
    pub deduction_total_cents: i64,
    pub tax_total_cents: i64,
    pub adjustments_total_cents: i64,
    pub net_cents: i64,
}

/// Monthly aggregate over all payroll items of a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PayrollRun {
    pub id: Uuid,
    pub month: i32,
    pub year: i32,
    pub employee_count: i32,
    pub total_gross_cents: i64,
    pub total_bonus_cents: i64,
    pub total_deductions_cents: i64,
    pub total_tax_cents: i64,
    pub total_attendance_deductions_cents: i64,
    pub total_net_cents: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl PayrollRun {
    pub fn period(&self) -> PayrollPeriod {
        PayrollPeriod {
            month: self.month as u32,
            year: self.year,
        }
    }
}

/// Formats cents as a decimal amount, e.g. `781200` → `7812.00`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_bounds_are_validated() {
        assert!(PayrollPeriod::new(0, 2025).is_err());
        assert!(PayrollPeriod::new(13, 2025).is_err());
        assert!(PayrollPeriod::new(1, 1999).is_err());
        assert!(PayrollPeriod::new(1, 2101).is_err());
        assert!(PayrollPeriod::new(12, 2100).is_ok());
    }

    #[test]
    fn working_days_skip_weekends() {
        // January 2025 starts on a Wednesday and has 23 weekdays.
        let period = PayrollPeriod::new(1, 2025).unwrap();
        let days = period.working_days();
        assert_eq!(days.len(), 23);
        assert_eq!(days[0], NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(*days.last().unwrap(), NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
        assert_eq!(period.last_day(), NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
    }

    #[test]
    fn december_rolls_over() {
        let period = PayrollPeriod::new(12, 2024).unwrap();
        assert_eq!(period.last_day(), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn cents_format() {
        assert_eq!(format_cents(781200), "7812.00");
        assert_eq!(format_cents(-5), "-0.05");
    }
}
