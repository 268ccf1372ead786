//! Error types for schema reconciliation.

use std::fmt;

use crate::shape::ObjectKind;

/// What a [`MigrateError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingObject {
    /// A catalog object (table, view, index).
    Object(ObjectKind),
    /// A column of an existing table.
    Column,
}

impl fmt::Display for MissingObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(kind) => write!(f, "{}", kind.as_str()),
            Self::Column => f.write_str("column"),
        }
    }
}

/// Errors that can occur while inspecting or migrating a table.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// A referenced table or column does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing object.
        kind: MissingObject,
        /// Name of the missing object (`table.column` for columns).
        name: String,
    },

    /// The requested change collides with the live schema or its data.
    #[error("Conflict on table '{table}'{}: {reason}", column_suffix(.column))]
    Conflict {
        /// Table being migrated.
        table: String,
        /// Column involved, if the conflict is column-specific.
        column: Option<String>,
        /// What collided.
        reason: String,
    },

    /// The committed schema does not match the requested shape.
    #[error(
        "Postcondition failed for table '{table}':\n{}",
        .differences.iter().map(|d| format!("  - {}", d)).collect::<Vec<_>>().join("\n")
    )]
    Postcondition {
        /// Table that was migrated.
        table: String,
        /// Every difference between the desired and the live shape.
        differences: Vec<String>,
    },

    /// The store rejected a statement issued during a migration.
    #[error("Statement rejected{}: {statement}: {source}", column_suffix(.column))]
    Store {
        /// The offending SQL statement.
        statement: String,
        /// Column the statement was about, if any.
        column: Option<String>,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The plan or target shape is inconsistent.
    #[error("Invalid migration plan: {0}")]
    InvalidPlan(String),

    /// Database error outside of a migration statement.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading shape files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn column_suffix(column: &Option<String>) -> String {
    column
        .as_ref()
        .map(|c| format!(" (column '{}')", c))
        .unwrap_or_default()
}

impl MigrateError {
    /// Creates a not-found error for a table.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::NotFound {
            kind: MissingObject::Object(ObjectKind::Table),
            name: table.into(),
        }
    }

    /// Creates a not-found error for a column.
    pub fn column_not_found(table: &str, column: &str) -> Self {
        Self::NotFound {
            kind: MissingObject::Column,
            name: format!("{}.{}", table, column),
        }
    }

    /// Returns true for errors caused by the caller rather than the store.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InvalidPlan(_) | Self::Conflict { .. }
        )
    }
}

/// Result type for reshape operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
