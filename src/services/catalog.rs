//! The ordered catalog of tenant migration units.
//!
//! One list serves both migration paths: the full path runs every unit in
//! order, the legacy path runs the units flagged `legacy_safe`, in the same
//! order. Order is maintained by hand; [`Catalog::verify`] checks it.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::db::schema::ColumnType::*;
use crate::db::schema::{col, created_at, updated_at, uuid_pk, ColumnDef, SchemaOp};
use crate::error::MigrationError;

/// Tables whose presence without a history table marks a legacy database.
pub const ANCHOR_TABLES: [&str; 3] = ["employees", "attendance_policies", "departments"];

#[derive(Debug)]
pub struct MigrationUnit {
    /// Timestamp-prefixed, strictly increasing across the catalog.
    pub id: &'static str,
    /// Purely additive and safe to run against a database without history.
    pub legacy_safe: bool,
    pub up: &'static [SchemaOp],
    /// Best effort. Empty means the unit cannot be reverted.
    pub down: &'static [SchemaOp],
}

impl MigrationUnit {
    /// Hex SHA-256 over the id and the up operations.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        // Serializing plain data into a String cannot fail.
        hasher.update(serde_json::to_string(self.up).unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Tables this unit creates from scratch.
    pub fn created_tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.up.iter().filter_map(|op| match op {
            SchemaOp::CreateTable { table, .. } => Some(*table),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    units: &'static [MigrationUnit],
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl Catalog {
    pub fn standard() -> Self {
        Self { units: UNITS }
    }

    pub fn new(units: &'static [MigrationUnit]) -> Self {
        Self { units }
    }

    pub fn units(&self) -> &'static [MigrationUnit] {
        self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&'static MigrationUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn legacy_units(&self) -> impl Iterator<Item = &'static MigrationUnit> {
        self.units.iter().filter(|u| u.legacy_safe)
    }

    /// Checks the hand-maintained order.
    ///
    /// - ids are unique and strictly increasing;
    /// - on the full path, every foreign-key target and every altered table
    ///   is created by an earlier operation;
    /// - on the legacy path, foreign-key targets are created by an earlier
    ///   legacy unit or are anchor tables, no operation is destructive, and no
    ///   anchor table is created.
    pub fn verify(&self) -> Result<(), MigrationError> {
        for pair in self.units.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(MigrationError::CatalogOrder(format!(
                    "{} must sort after {}",
                    pair[1].id, pair[0].id
                )));
            }
        }

        verify_path(self.units.iter(), &[], true)?;
        verify_path(self.legacy_units(), &ANCHOR_TABLES, false)?;

        for unit in self.legacy_units() {
            if let Some(op) = unit.up.iter().find(|op| op.is_destructive()) {
                return Err(MigrationError::CatalogOrder(format!(
                    "{} is marked legacy-safe but {op:?} is destructive",
                    unit.id
                )));
            }
            if let Some(table) = unit.created_tables().find(|t| ANCHOR_TABLES.contains(t)) {
                return Err(MigrationError::CatalogOrder(format!(
                    "{} is marked legacy-safe but creates anchor table {table}",
                    unit.id
                )));
            }
        }
        Ok(())
    }
}

fn verify_path<'a>(
    units: impl Iterator<Item = &'a MigrationUnit>,
    preexisting: &[&'static str],
    altered_tables_must_exist: bool,
) -> Result<(), MigrationError> {
    let mut known: HashSet<&'static str> = preexisting.iter().copied().collect();
    for unit in units {
        for op in unit.up {
            for table in op.referenced_tables() {
                if !known.contains(table) {
                    return Err(MigrationError::CatalogOrder(format!(
                        "{} references {table} before any unit creates it",
                        unit.id
                    )));
                }
            }
            match op {
                SchemaOp::CreateTable { table, .. } => {
                    known.insert(*table);
                }
                SchemaOp::DropTable { table } => {
                    known.remove(*table);
                }
                other if altered_tables_must_exist && !known.contains(other.table()) => {
                    return Err(MigrationError::CatalogOrder(format!(
                        "{} alters {} before any unit creates it",
                        unit.id,
                        other.table()
                    )));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

// ─── Table definitions ────────────────────────────────────────────────────────

const ROLES: &[ColumnDef] = &[
    uuid_pk(),
    col("name", Varchar(64)).unique(),
    col("guard_name", Varchar(32)).default("'web'"),
    created_at(),
    updated_at(),
];

const PERMISSIONS: &[ColumnDef] = &[
    uuid_pk(),
    col("name", Varchar(128)).unique(),
    col("guard_name", Varchar(32)).default("'web'"),
    created_at(),
    updated_at(),
];

const ROLE_HAS_PERMISSIONS: &[ColumnDef] = &[
    col("role_id", Uuid).references("roles", "id", "CASCADE"),
    col("permission_id", Uuid).references("permissions", "id", "CASCADE"),
];

const DEPARTMENTS: &[ColumnDef] = &[
    uuid_pk(),
    col("name", Varchar(128)).unique(),
    col("description", Text).nullable(),
    created_at(),
    updated_at(),
];

const EMPLOYEES: &[ColumnDef] = &[
    uuid_pk(),
    col("department_id", Uuid)
        .nullable()
        .references("departments", "id", "SET NULL"),
    col("first_name", Varchar(128)),
    col("last_name", Varchar(128)),
    col("email", Varchar(255)).unique(),
    col("phone", Varchar(32)).nullable(),
    col("status", Varchar(32)).default("'active'"),
    col("hired_on", Date).nullable(),
    created_at(),
    updated_at(),
];

const ATTENDANCE_POLICIES: &[ColumnDef] = &[
    uuid_pk(),
    col("name", Varchar(128)),
    col("work_start", Time).default("'09:00'"),
    col("work_end", Time).default("'17:30'"),
    col("grace_minutes", Integer).default("5"),
    created_at(),
    updated_at(),
];

const ATTENDANCES: &[ColumnDef] = &[
    uuid_pk(),
    col("employee_id", Uuid).references("employees", "id", "CASCADE"),
    col("date", Date),
    col("check_in", Time).nullable(),
    col("check_out", Time).nullable(),
    col("status", Varchar(16)).default("'present'"),
    created_at(),
    updated_at(),
];

const LEAVE_TYPES: &[ColumnDef] = &[
    uuid_pk(),
    col("name", Varchar(128)).unique(),
    col("days_per_year", Integer).default("0"),
    created_at(),
    updated_at(),
];

const LEAVE_REQUESTS: &[ColumnDef] = &[
    uuid_pk(),
    col("employee_id", Uuid).references("employees", "id", "CASCADE"),
    col("leave_type_id", Uuid).references("leave_types", "id", "RESTRICT"),
    col("starts_on", Date),
    col("ends_on", Date),
    col("status", Varchar(16)).default("'pending'"),
    col("reason", Text).nullable(),
    created_at(),
    updated_at(),
];

const PAYROLL_SETTINGS: &[ColumnDef] = &[
    uuid_pk(),
    col("tax_rate", Double).default("5"),
    col("deduction_rate", Double).default("2"),
    created_at(),
    updated_at(),
];

const PAYROLL_RUNS: &[ColumnDef] = &[
    uuid_pk(),
    col("month", Integer),
    col("year", Integer),
    col("employee_count", Integer).default("0"),
    col("total_gross_cents", BigInt).default("0"),
    col("total_bonus_cents", BigInt).default("0"),
    col("total_deductions_cents", BigInt).default("0"),
    col("total_tax_cents", BigInt).default("0"),
    col("total_net_cents", BigInt).default("0"),
    col("status", Varchar(16)).default("'draft'"),
    created_at(),
    updated_at(),
];

const PAYROLL_ITEMS: &[ColumnDef] = &[
    uuid_pk(),
    col("payroll_run_id", Uuid).references("payroll_runs", "id", "CASCADE"),
    col("employee_id", Uuid).references("employees", "id", "CASCADE"),
    col("gross_cents", BigInt).default("0"),
    col("bonus_total_cents", BigInt).default("0"),
    col("company_deduction_cents", BigInt).default("0"),
    col("company_tax_cents", BigInt).default("0"),
    col("deduction_total_cents", BigInt).default("0"),
    col("tax_total_cents", BigInt).default("0"),
    col("adjustments_total_cents", BigInt).default("0"),
    col("net_cents", BigInt).default("0"),
    created_at(),
    updated_at(),
];

// ─── Units ────────────────────────────────────────────────────────────────────

static UNITS: &[MigrationUnit] = &[
    MigrationUnit {
        id: "2024_01_01_000001_create_roles_and_permissions_tables",
        legacy_safe: true,
        up: &[
            SchemaOp::CreateTable { table: "roles", columns: ROLES },
            SchemaOp::CreateTable { table: "permissions", columns: PERMISSIONS },
            SchemaOp::CreateTable {
                table: "role_has_permissions",
                columns: ROLE_HAS_PERMISSIONS,
            },
            SchemaOp::CreateIndex {
                table: "role_has_permissions",
                name: "role_has_permissions_unique",
                columns: &["role_id", "permission_id"],
                unique: true,
            },
        ],
        down: &[
            SchemaOp::DropTable { table: "role_has_permissions" },
            SchemaOp::DropTable { table: "permissions" },
            SchemaOp::DropTable { table: "roles" },
        ],
    },
    MigrationUnit {
        id: "2024_01_01_000002_create_departments_table",
        legacy_safe: false,
        up: &[SchemaOp::CreateTable { table: "departments", columns: DEPARTMENTS }],
        down: &[SchemaOp::DropTable { table: "departments" }],
    },
    MigrationUnit {
        id: "2024_01_01_000003_create_employees_table",
        legacy_safe: false,
        up: &[SchemaOp::CreateTable { table: "employees", columns: EMPLOYEES }],
        down: &[SchemaOp::DropTable { table: "employees" }],
    },
    MigrationUnit {
        id: "2024_01_01_000004_create_attendance_policies_table",
        legacy_safe: false,
        up: &[SchemaOp::CreateTable {
            table: "attendance_policies",
            columns: ATTENDANCE_POLICIES,
        }],
        down: &[SchemaOp::DropTable { table: "attendance_policies" }],
    },
    MigrationUnit {
        id: "2024_01_01_000005_create_attendances_table",
        legacy_safe: true,
        up: &[
            SchemaOp::CreateTable { table: "attendances", columns: ATTENDANCES },
            SchemaOp::CreateIndex {
                table: "attendances",
                name: "attendances_employee_date_unique",
                columns: &["employee_id", "date"],
                unique: true,
            },
        ],
        down: &[SchemaOp::DropTable { table: "attendances" }],
    },
    MigrationUnit {
        id: "2024_01_01_000006_create_leave_tables",
        legacy_safe: true,
        up: &[
            SchemaOp::CreateTable { table: "leave_types", columns: LEAVE_TYPES },
            SchemaOp::CreateTable { table: "leave_requests", columns: LEAVE_REQUESTS },
        ],
        down: &[
            SchemaOp::DropTable { table: "leave_requests" },
            SchemaOp::DropTable { table: "leave_types" },
        ],
    },
    MigrationUnit {
        id: "2024_02_12_000001_add_role_id_to_employees",
        legacy_safe: true,
        up: &[SchemaOp::AddColumn {
            table: "employees",
            column: col("role_id", Uuid)
                .nullable()
                .references("roles", "id", "SET NULL"),
        }],
        down: &[SchemaOp::DropColumn { table: "employees", column: "role_id" }],
    },
    MigrationUnit {
        id: "2024_03_04_000001_add_biometric_columns_to_employees",
        legacy_safe: true,
        up: &[
            SchemaOp::AddColumn {
                table: "employees",
                column: col("face_descriptor", Text).nullable(),
            },
            SchemaOp::AddColumn {
                table: "employees",
                column: col("webauthn_credential_id", Varchar(255)).nullable(),
            },
            SchemaOp::AddColumn {
                table: "employees",
                column: col("biometric_enrolled_at", Timestamp).nullable(),
            },
        ],
        down: &[
            SchemaOp::DropColumn { table: "employees", column: "biometric_enrolled_at" },
            SchemaOp::DropColumn { table: "employees", column: "webauthn_credential_id" },
            SchemaOp::DropColumn { table: "employees", column: "face_descriptor" },
        ],
    },
    MigrationUnit {
        id: "2024_03_04_000002_add_portal_login_columns_to_employees",
        legacy_safe: true,
        up: &[
            SchemaOp::AddColumn {
                table: "employees",
                column: col("password_hash", Text).nullable(),
            },
            SchemaOp::AddColumn {
                table: "employees",
                column: col("last_login_at", Timestamp).nullable(),
            },
        ],
        down: &[
            SchemaOp::DropColumn { table: "employees", column: "last_login_at" },
            SchemaOp::DropColumn { table: "employees", column: "password_hash" },
        ],
    },
    MigrationUnit {
        id: "2024_03_18_000001_add_salary_to_employees",
        legacy_safe: true,
        up: &[SchemaOp::AddColumn {
            table: "employees",
            column: col("salary_cents", BigInt).nullable(),
        }],
        down: &[SchemaOp::DropColumn { table: "employees", column: "salary_cents" }],
    },
    MigrationUnit {
        id: "2024_04_02_000001_add_geofence_columns_to_attendance_policies",
        legacy_safe: true,
        up: &[
            SchemaOp::AddColumn {
                table: "attendance_policies",
                column: col("latitude", Double).nullable(),
            },
            SchemaOp::AddColumn {
                table: "attendance_policies",
                column: col("longitude", Double).nullable(),
            },
            SchemaOp::AddColumn {
                table: "attendance_policies",
                column: col("radius_meters", Integer).nullable(),
            },
        ],
        // Additive only; the columns are left in place on rollback.
        down: &[],
    },
    MigrationUnit {
        id: "2024_04_02_000002_add_check_in_method_to_attendances",
        legacy_safe: true,
        up: &[
            SchemaOp::AddColumn {
                table: "attendances",
                column: col("check_in_method", Varchar(16)).default("'manual'"),
            },
            SchemaOp::AddColumn {
                table: "attendances",
                column: col("check_in_latitude", Double).nullable(),
            },
            SchemaOp::AddColumn {
                table: "attendances",
                column: col("check_in_longitude", Double).nullable(),
            },
        ],
        down: &[
            SchemaOp::DropColumn { table: "attendances", column: "check_in_longitude" },
            SchemaOp::DropColumn { table: "attendances", column: "check_in_latitude" },
            SchemaOp::DropColumn { table: "attendances", column: "check_in_method" },
        ],
    },
    MigrationUnit {
        id: "2024_05_20_000001_create_payroll_settings_table",
        legacy_safe: true,
        up: &[SchemaOp::CreateTable {
            table: "payroll_settings",
            columns: PAYROLL_SETTINGS,
        }],
        down: &[SchemaOp::DropTable { table: "payroll_settings" }],
    },
    MigrationUnit {
        id: "2024_05_20_000002_create_payroll_runs_table",
        legacy_safe: true,
        up: &[
            SchemaOp::CreateTable { table: "payroll_runs", columns: PAYROLL_RUNS },
            SchemaOp::CreateIndex {
                table: "payroll_runs",
                name: "payroll_runs_period_unique",
                columns: &["month", "year"],
                unique: true,
            },
        ],
        down: &[SchemaOp::DropTable { table: "payroll_runs" }],
    },
    MigrationUnit {
        id: "2024_05_20_000003_create_payroll_items_table",
        legacy_safe: true,
        up: &[
            SchemaOp::CreateTable { table: "payroll_items", columns: PAYROLL_ITEMS },
            SchemaOp::CreateIndex {
                table: "payroll_items",
                name: "payroll_items_run_idx",
                columns: &["payroll_run_id"],
                unique: false,
            },
        ],
        down: &[SchemaOp::DropTable { table: "payroll_items" }],
    },
    MigrationUnit {
        id: "2024_06_11_000001_add_attendance_deductions_to_payroll",
        legacy_safe: true,
        up: &[
            SchemaOp::AddColumn {
                table: "payroll_runs",
                column: col("total_attendance_deductions_cents", BigInt).default("0"),
            },
            SchemaOp::AddColumn {
                table: "payroll_items",
                column: col("attendance_deduction_cents", BigInt).default("0"),
            },
        ],
        down: &[
            SchemaOp::DropColumn {
                table: "payroll_items",
                column: "attendance_deduction_cents",
            },
            SchemaOp::DropColumn {
                table: "payroll_runs",
                column: "total_attendance_deductions_cents",
            },
        ],
    },
    MigrationUnit {
        id: "2024_07_01_000001_rename_employees_phone_to_phone_number",
        legacy_safe: false,
        up: &[SchemaOp::RenameColumn {
            table: "employees",
            from: "phone",
            to: "phone_number",
        }],
        down: &[SchemaOp::RenameColumn {
            table: "employees",
            from: "phone_number",
            to: "phone",
        }],
    },
    MigrationUnit {
        id: "2024_08_15_000001_add_attendance_date_index",
        legacy_safe: true,
        up: &[SchemaOp::CreateIndex {
            table: "attendances",
            name: "attendances_date_idx",
            columns: &["date"],
            unique: false,
        }],
        down: &[SchemaOp::DropIndex {
            table: "attendances",
            name: "attendances_date_idx",
        }],
    },
];
