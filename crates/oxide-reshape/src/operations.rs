//! Migration operations.
//!
//! Every statement the migrator issues is expressed as a
//! [`MigrationOperation`] first and rendered to SQL by the dialect, so the
//! same values serve execution, dry runs and error context.

use serde::{Deserialize, Serialize};

use crate::shape::{ColumnSpec, IndexShape, ObjectKind};

/// A source-to-target column pair used when copying rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Column read from the source table.
    pub source: String,
    /// Column written in the target table.
    pub target: String,
}

impl ColumnMapping {
    /// Creates a mapping.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A single migration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationOperation {
    /// Create a new table.
    CreateTable {
        /// Table name.
        name: String,
        /// Column definitions.
        columns: Vec<ColumnSpec>,
    },

    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSpec,
    },

    /// Copy every row from one table into another through an explicit
    /// column projection.
    CopyRows {
        /// Source table.
        from: String,
        /// Target table.
        to: String,
        /// Columns to copy. Target columns not listed keep their default.
        projection: Vec<ColumnMapping>,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
    },

    /// Rename a table.
    RenameTable {
        /// Current table name.
        old_name: String,
        /// New table name.
        new_name: String,
    },

    /// Create an index.
    CreateIndex {
        /// Table to index.
        table: String,
        /// Index definition.
        index: IndexShape,
    },

    /// Drop a view or trigger.
    DropObject {
        /// Object kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
    },

    /// Recreate a view or trigger from its catalog SQL.
    CreateObject {
        /// Object kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
        /// `CREATE` statement as stored in the catalog.
        sql: String,
    },

    /// Resolve a view without reading rows.
    CheckView {
        /// View name.
        name: String,
    },
}

impl MigrationOperation {
    /// Creates a `CreateTable` operation.
    #[must_use]
    pub fn create_table(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self::CreateTable {
            name: name.into(),
            columns,
        }
    }

    /// Creates an `AddColumn` operation.
    #[must_use]
    pub fn add_column(table: impl Into<String>, column: ColumnSpec) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Creates a `CopyRows` operation.
    #[must_use]
    pub fn copy_rows(
        from: impl Into<String>,
        to: impl Into<String>,
        projection: Vec<ColumnMapping>,
    ) -> Self {
        Self::CopyRows {
            from: from.into(),
            to: to.into(),
            projection,
        }
    }

    /// Creates a `DropTable` operation.
    #[must_use]
    pub fn drop_table(name: impl Into<String>) -> Self {
        Self::DropTable { name: name.into() }
    }

    /// Creates a `RenameTable` operation.
    #[must_use]
    pub fn rename_table(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self::RenameTable {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates a `CreateIndex` operation.
    #[must_use]
    pub fn create_index(table: impl Into<String>, index: IndexShape) -> Self {
        Self::CreateIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates a `DropObject` operation.
    #[must_use]
    pub fn drop_object(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::DropObject {
            kind,
            name: name.into(),
        }
    }

    /// Creates a `CreateObject` operation.
    #[must_use]
    pub fn create_object(kind: ObjectKind, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::CreateObject {
            kind,
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// Creates a `CheckView` operation.
    #[must_use]
    pub fn check_view(name: impl Into<String>) -> Self {
        Self::CheckView { name: name.into() }
    }

    /// Returns the column this operation is about, for error context.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::AddColumn { column, .. } => Some(&column.name),
            _ => None,
        }
    }

    /// Returns a short description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::CreateTable { name, columns } => {
                format!("Create table {} ({} columns)", name, columns.len())
            }
            Self::AddColumn { table, column } => {
                format!("Add column {}.{}", table, column.name)
            }
            Self::CopyRows { from, to, .. } => format!("Copy rows {} -> {}", from, to),
            Self::DropTable { name } => format!("Drop table {}", name),
            Self::RenameTable { old_name, new_name } => {
                format!("Rename table {} -> {}", old_name, new_name)
            }
            Self::CreateIndex { table, index } => {
                format!("Create index {} on {}", index.name, table)
            }
            Self::DropObject { kind, name } => format!("Drop {} {}", kind.as_str(), name),
            Self::CreateObject { kind, name, .. } => {
                format!("Recreate {} {}", kind.as_str(), name)
            }
            Self::CheckView { name } => format!("Check view {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ColumnType;

    #[test]
    fn test_column_context() {
        let op = MigrationOperation::add_column(
            "entities",
            ColumnSpec::new("location", ColumnType::Text),
        );
        assert_eq!(op.column(), Some("location"));
        assert_eq!(op.describe(), "Add column entities.location");

        let op = MigrationOperation::drop_table("entities");
        assert_eq!(op.column(), None);

        let op = MigrationOperation::drop_object(ObjectKind::Trigger, "trg_entities_audit");
        assert_eq!(op.describe(), "Drop trigger trg_entities_audit");
    }

    #[test]
    fn test_serialization_is_tagged() {
        let op = MigrationOperation::rename_table("_shadow", "entities");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "rename_table");
        assert_eq!(json["new_name"], "entities");
    }
}
