use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Employee {
    pub id: Uuid,
    pub department_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Monthly salary in cents. `None` or non-positive falls back to the
    /// default salary at payroll time.
    pub salary_cents: Option<i64>,
}

/// Employee upsert payload; `email` is the natural key.
#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub department_id: Uuid,
    pub role_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub salary_cents: i64,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attendance row; (employee_id, date) is unique.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub date: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub status: AttendanceStatus,
    pub check_in_method: &'static str,
}
