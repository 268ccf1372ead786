//! Safe column-level schema evolution for SQLite.
//!
//! `oxide-reshape` reconciles a live table with a target [`TableShape`]:
//! - Missing columns are appended in place with `ALTER TABLE .. ADD COLUMN`
//! - Renames, removals and type changes go through a shadow table that is
//!   filled, swapped in and re-indexed inside one transaction
//! - Every migration is verified against the live catalog after commit
//!
//! # Architecture
//!
//! - **Shape** - Column, index and table descriptions
//! - **Inspector** - Reads live table shapes from the catalog
//! - **Plan** - Diffs a live shape against a desired one
//! - **Migrator** - Applies plans additively or by rebuild
//! - **Observer** - Receives phase transitions and errors
//! - **Dialect** - SQLite SQL generation
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_reshape::prelude::*;
//! use sqlx::{Connection, SqliteConnection};
//!
//! let mut conn = SqliteConnection::connect("sqlite:app.db").await?;
//!
//! let desired = TableShape::new("entities")
//!     .column(ColumnSpec::new("id", ColumnType::Integer).primary_key())
//!     .column(ColumnSpec::new("full_name", ColumnType::Text).not_null());
//!
//! let mut renames = RenameMap::new();
//! renames.insert("name".to_string(), "full_name".to_string());
//!
//! let result = SchemaMigrator::new(&mut conn)
//!     .reconcile_rebuild("entities", &desired, &renames)
//!     .await?;
//! println!("copied {} rows", result.rows_copied);
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Show the live shape of a table
//! oxide-reshape inspect entities
//!
//! # Append missing columns from a shape file
//! oxide-reshape add --shape entities.json
//!
//! # Rebuild with a rename, printing the SQL only
//! oxide-reshape rebuild --shape entities.json --rename name=full_name --dry-run
//! ```

pub mod dialect;
pub mod error;
pub mod inspector;
pub mod migrator;
pub mod observer;
pub mod operations;
pub mod plan;
pub mod shape;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::dialect::SqliteDialect;
    pub use crate::error::{MigrateError, MissingObject, Result};
    pub use crate::inspector::SchemaInspector;
    pub use crate::migrator::{AppliedResult, SchemaMigrator, Strategy};
    pub use crate::observer::{MigrationObserver, RebuildPhase, TracingObserver};
    pub use crate::operations::{ColumnMapping, MigrationOperation};
    pub use crate::plan::{MigrationPlan, RenameMap};
    pub use crate::shape::{
        CatalogEntry, ColumnSpec, ColumnType, DefaultValue, ForeignKeyAction, ForeignKeyRef,
        IndexShape, ObjectKind, TableShape,
    };
}

/// Parses a `old=new` rename argument.
///
/// Both sides must be non-empty.
pub fn parse_rename(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((old, new)) if !old.trim().is_empty() && !new.trim().is_empty() => {
            Ok((old.trim().to_string(), new.trim().to_string()))
        }
        _ => Err(format!("expected OLD=NEW, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rename() {
        assert_eq!(
            parse_rename("name=full_name"),
            Ok(("name".to_string(), "full_name".to_string()))
        );
        assert_eq!(
            parse_rename(" a = b "),
            Ok(("a".to_string(), "b".to_string()))
        );
        assert!(parse_rename("name").is_err());
        assert!(parse_rename("=full_name").is_err());
        assert!(parse_rename("name=").is_err());
    }
}
