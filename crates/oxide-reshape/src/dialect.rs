//! SQLite dialect for reshape migrations.
//!
//! SQLite has limited ALTER TABLE support: columns can be added but not
//! retyped, so anything beyond appending columns goes through table
//! recreation. This module owns the explicit [`ColumnType`] to SQLite type
//! table and renders every [`MigrationOperation`] to a single statement.

use crate::operations::{ColumnMapping, MigrationOperation};
use crate::shape::{ColumnSpec, ColumnType, IndexShape, ObjectKind};

/// SQLite migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the declared type written for a column type.
    ///
    /// Booleans keep a `BOOLEAN` declaration (NUMERIC affinity, values stored
    /// as 0/1) so that inspection can tell them apart from integers.
    #[must_use]
    pub fn type_name(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Blob => "BLOB",
        }
    }

    /// Quote an identifier (table name, column name, etc.).
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Generates column definition SQL.
    ///
    /// `inline_primary_key` is false when the table declares a composite
    /// primary key at table level.
    #[must_use]
    pub fn column_definition(&self, column: &ColumnSpec, inline_primary_key: bool) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(column.column_type).to_string(),
        ];

        if column.is_primary_key && inline_primary_key {
            parts.push("PRIMARY KEY".to_string());
        }

        if !column.nullable && !(column.is_primary_key && inline_primary_key) {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default_sql) = column.default.to_sql() {
            parts.push(format!("DEFAULT {}", default_sql));
        }

        if let Some(ref fk) = column.foreign_key {
            parts.push(format!(
                "REFERENCES {} ({}) ON DELETE {}",
                self.quote_identifier(&fk.referenced_table),
                self.quote_identifier(&fk.referenced_column),
                fk.on_delete.to_sql()
            ));
        }

        parts.join(" ")
    }

    /// Generates SQL for creating a table.
    fn create_table_sql(&self, name: &str, columns: &[ColumnSpec]) -> String {
        let pk_columns: Vec<&ColumnSpec> = columns.iter().filter(|c| c.is_primary_key).collect();
        let inline_pk = pk_columns.len() <= 1;

        let mut sql = String::from("CREATE TABLE ");
        sql.push_str(&self.quote_identifier(name));
        sql.push_str(" (\n");

        let col_defs: Vec<String> = columns
            .iter()
            .map(|c| self.column_definition(c, inline_pk))
            .collect();
        sql.push_str("  ");
        sql.push_str(&col_defs.join(",\n  "));

        if !inline_pk {
            sql.push_str(",\n  PRIMARY KEY (");
            let quoted: Vec<String> = pk_columns
                .iter()
                .map(|c| self.quote_identifier(&c.name))
                .collect();
            sql.push_str(&quoted.join(", "));
            sql.push(')');
        }

        sql.push_str("\n)");
        sql
    }

    /// Generates SQL for adding a column.
    fn add_column_sql(&self, table: &str, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column, true)
        )
    }

    /// Generates the `INSERT .. SELECT` used to copy rows between tables.
    fn copy_rows_sql(&self, from: &str, to: &str, projection: &[ColumnMapping]) -> String {
        let targets: Vec<String> = projection
            .iter()
            .map(|m| self.quote_identifier(&m.target))
            .collect();
        let sources: Vec<String> = projection
            .iter()
            .map(|m| self.quote_identifier(&m.source))
            .collect();
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.quote_identifier(to),
            targets.join(", "),
            sources.join(", "),
            self.quote_identifier(from)
        )
    }

    /// Generates SQL for dropping a table.
    fn drop_table_sql(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(name))
    }

    /// Generates SQL for renaming a table.
    fn rename_table_sql(&self, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )
    }

    /// Generates SQL for creating an index.
    fn create_index_sql(&self, table: &str, index: &IndexShape) -> String {
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        sql.push_str(&self.quote_identifier(&index.name));
        sql.push_str(" ON ");
        sql.push_str(&self.quote_identifier(table));
        sql.push_str(" (");

        let quoted: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        sql.push_str(&quoted.join(", "));
        sql.push(')');
        sql
    }

    /// Generates SQL for dropping a view or trigger.
    fn drop_object_sql(&self, kind: ObjectKind, name: &str) -> String {
        format!(
            "DROP {} {}",
            kind.as_str().to_ascii_uppercase(),
            self.quote_identifier(name)
        )
    }

    /// Generates a query that resolves a view without returning rows.
    fn check_view_sql(&self, name: &str) -> String {
        format!("SELECT * FROM {} LIMIT 0", self.quote_identifier(name))
    }

    /// Generates SQL for a migration operation.
    #[must_use]
    pub fn generate_sql(&self, operation: &MigrationOperation) -> String {
        match operation {
            MigrationOperation::CreateTable { name, columns } => {
                self.create_table_sql(name, columns)
            }
            MigrationOperation::AddColumn { table, column } => self.add_column_sql(table, column),
            MigrationOperation::CopyRows {
                from,
                to,
                projection,
            } => self.copy_rows_sql(from, to, projection),
            MigrationOperation::DropTable { name } => self.drop_table_sql(name),
            MigrationOperation::RenameTable { old_name, new_name } => {
                self.rename_table_sql(old_name, new_name)
            }
            MigrationOperation::CreateIndex { table, index } => {
                self.create_index_sql(table, index)
            }
            MigrationOperation::DropObject { kind, name } => self.drop_object_sql(*kind, name),
            MigrationOperation::CreateObject { sql, .. } => sql.clone(),
            MigrationOperation::CheckView { name } => self.check_view_sql(name),
        }
    }
}
