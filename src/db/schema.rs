//! Declarative schema operations.
//!
//! Migration units are lists of these values rather than hand-written SQL so
//! that every backend can run the same existence guard before mutating, and
//! so the catalog can be inspected (dependencies, checksums) without a
//! database.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Uuid,
    BigInt,
    Integer,
    Varchar(u16),
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    Double,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Uuid => "UUID".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Date => "DATE".into(),
            ColumnType::Time => "TIME".into(),
            ColumnType::Timestamp => "TIMESTAMPTZ".into(),
            ColumnType::Double => "DOUBLE PRECISION".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
    pub on_delete: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<&'static str>,
    pub references: Option<ForeignKey>,
}

/// Starts a NOT NULL column definition.
pub const fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        nullable: false,
        primary_key: false,
        unique: false,
        default: None,
        references: None,
    }
}

/// UUID primary key generated by the database.
pub const fn uuid_pk() -> ColumnDef {
    col("id", ColumnType::Uuid).primary().default("gen_random_uuid()")
}

pub const fn created_at() -> ColumnDef {
    col("created_at", ColumnType::Timestamp).default("NOW()")
}

pub const fn updated_at() -> ColumnDef {
    col("updated_at", ColumnType::Timestamp).default("NOW()")
}

impl ColumnDef {
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn default(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    pub const fn references(
        mut self,
        table: &'static str,
        column: &'static str,
        on_delete: &'static str,
    ) -> Self {
        self.references = Some(ForeignKey {
            table,
            column,
            on_delete,
        });
        self
    }

    /// Column clause as it appears inside CREATE TABLE / ADD COLUMN.
    pub fn sql(&self) -> String {
        let mut out = format!("\"{}\" {}", self.name, self.ty.sql());
        if self.primary_key {
            out.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if self.unique {
            out.push_str(" UNIQUE");
        }
        if let Some(default) = self.default {
            out.push_str(&format!(" DEFAULT {default}"));
        }
        if let Some(fk) = self.references {
            out.push_str(&format!(
                " REFERENCES \"{}\"(\"{}\") ON DELETE {}",
                fk.table, fk.column, fk.on_delete
            ));
        }
        out
    }
}

/// One structural change. Every variant has a matching existence guard in
/// the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchemaOp {
    CreateTable {
        table: &'static str,
        columns: &'static [ColumnDef],
    },
    AddColumn {
        table: &'static str,
        column: ColumnDef,
    },
    RenameColumn {
        table: &'static str,
        from: &'static str,
        to: &'static str,
    },
    DropColumn {
        table: &'static str,
        column: &'static str,
    },
    DropTable {
        table: &'static str,
    },
    CreateIndex {
        table: &'static str,
        name: &'static str,
        columns: &'static [&'static str],
        unique: bool,
    },
    DropIndex {
        table: &'static str,
        name: &'static str,
    },
}

impl SchemaOp {
    pub fn table(&self) -> &'static str {
        match self {
            SchemaOp::CreateTable { table, .. }
            | SchemaOp::AddColumn { table, .. }
            | SchemaOp::RenameColumn { table, .. }
            | SchemaOp::DropColumn { table, .. }
            | SchemaOp::DropTable { table }
            | SchemaOp::CreateIndex { table, .. }
            | SchemaOp::DropIndex { table, .. } => *table,
        }
    }

    /// Tables this operation cannot run without: foreign-key targets.
    /// The operation's own table is not included; alterations on a missing
    /// table are skipped by the guard instead of failing.
    pub fn referenced_tables(&self) -> Vec<&'static str> {
        match self {
            SchemaOp::CreateTable { table, columns } => columns
                .iter()
                .filter_map(|c| c.references.map(|fk| fk.table))
                .filter(|t| t != table)
                .collect(),
            SchemaOp::AddColumn { column, .. } => {
                column.references.map(|fk| fk.table).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether the operation can lose data or break existing queries.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchemaOp::RenameColumn { .. }
                | SchemaOp::DropColumn { .. }
                | SchemaOp::DropTable { .. }
                | SchemaOp::DropIndex { .. }
        )
    }

    /// Postgres DDL for this operation. Identifiers come from the static
    /// catalog, never from user input.
    pub fn to_sql(&self) -> String {
        match self {
            SchemaOp::CreateTable { table, columns } => {
                let cols: Vec<String> = columns.iter().map(ColumnDef::sql).collect();
                format!(
                    "CREATE TABLE IF NOT EXISTS \"{table}\" (\n    {}\n)",
                    cols.join(",\n    ")
                )
            }
            SchemaOp::AddColumn { table, column } => format!(
                "ALTER TABLE \"{table}\" ADD COLUMN IF NOT EXISTS {}",
                column.sql()
            ),
            SchemaOp::RenameColumn { table, from, to } => {
                format!("ALTER TABLE \"{table}\" RENAME COLUMN \"{from}\" TO \"{to}\"")
            }
            SchemaOp::DropColumn { table, column } => {
                format!("ALTER TABLE \"{table}\" DROP COLUMN IF EXISTS \"{column}\"")
            }
            SchemaOp::DropTable { table } => format!("DROP TABLE IF EXISTS \"{table}\" CASCADE"),
            SchemaOp::CreateIndex {
                table,
                name,
                columns,
                unique,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
                format!(
                    "CREATE {}INDEX IF NOT EXISTS \"{name}\" ON \"{table}\" ({})",
                    if *unique { "UNIQUE " } else { "" },
                    cols.join(", ")
                )
            }
            SchemaOp::DropIndex { name, .. } => format!("DROP INDEX IF EXISTS \"{name}\""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_sql_renders_constraints() {
        let c = col("department_id", ColumnType::Uuid)
            .nullable()
            .references("departments", "id", "SET NULL");
        assert_eq!(
            c.sql(),
            "\"department_id\" UUID REFERENCES \"departments\"(\"id\") ON DELETE SET NULL"
        );
        assert_eq!(
            uuid_pk().sql(),
            "\"id\" UUID PRIMARY KEY DEFAULT gen_random_uuid()"
        );
    }

    #[test]
    fn add_column_is_guarded_in_sql_too() {
        let op = SchemaOp::AddColumn {
            table: "employees",
            column: col("salary_cents", ColumnType::BigInt).nullable(),
        };
        assert_eq!(
            op.to_sql(),
            "ALTER TABLE \"employees\" ADD COLUMN IF NOT EXISTS \"salary_cents\" BIGINT"
        );
    }

    #[test]
    fn unique_index_sql() {
        let op = SchemaOp::CreateIndex {
            table: "attendances",
            name: "attendances_employee_date_unique",
            columns: &["employee_id", "date"],
            unique: true,
        };
        assert_eq!(
            op.to_sql(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"attendances_employee_date_unique\" ON \"attendances\" (\"employee_id\", \"date\")"
        );
    }

    #[test]
    fn rename_is_destructive() {
        let op = SchemaOp::RenameColumn {
            table: "employees",
            from: "phone",
            to: "phone_number",
        };
        assert!(op.is_destructive());
        assert!(op.referenced_tables().is_empty());
    }
}
