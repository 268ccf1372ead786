//! Table shape representation types.
//!
//! A [`TableShape`] describes a table at a point in time: its columns in
//! declared order and its explicitly created indexes. The same types describe
//! both what the live database contains (read by the inspector) and what the
//! caller wants the table to look like.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Column types supported by reshape migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    /// UTF-8 text.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// Floating point.
    Real,
    /// Boolean, stored as 0/1.
    Boolean,
    /// Binary large object.
    Blob,
}

impl ColumnType {
    /// Maps a declared SQLite column type back to a [`ColumnType`].
    ///
    /// Returns `None` when the declared type has no obvious counterpart.
    /// The rules follow SQLite's affinity rules, with `BOOL` checked first.
    #[must_use]
    pub fn from_declared(declared: &str) -> Option<Self> {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("BOOL") {
            Some(Self::Boolean)
        } else if upper.contains("INT") {
            Some(Self::Integer)
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Some(Self::Text)
        } else if upper.is_empty() || upper.contains("BLOB") {
            Some(Self::Blob)
        } else if ["REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
            .iter()
            .any(|t| upper.contains(t))
        {
            Some(Self::Real)
        } else {
            None
        }
    }

    /// Returns the type name used in shape files and diagnostics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Blob => "BLOB",
        }
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// No default value.
    #[default]
    None,
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Null => Some("NULL".to_string()),
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            Self::Expression(expr) => Some(expr.clone()),
        }
    }

    /// Parses the `dflt_value` text reported by the catalog for a column of
    /// the given type.
    #[must_use]
    pub fn from_sql(raw: Option<&str>, column_type: ColumnType) -> Self {
        let Some(raw) = raw.map(str::trim) else {
            return Self::None;
        };

        if raw.eq_ignore_ascii_case("NULL") {
            return Self::Null;
        }
        if raw.eq_ignore_ascii_case("TRUE") {
            return Self::Bool(true);
        }
        if raw.eq_ignore_ascii_case("FALSE") {
            return Self::Bool(false);
        }
        if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            return Self::String(raw[1..raw.len() - 1].replace("''", "'"));
        }
        if let Ok(i) = raw.parse::<i64>() {
            return match column_type {
                ColumnType::Boolean if i == 0 || i == 1 => Self::Bool(i == 1),
                ColumnType::Real => Self::Float(i as f64),
                _ => Self::Integer(i),
            };
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Expression(raw.to_string())
    }

    /// Returns the default the catalog reports for this value on a column of
    /// `column_type`.
    #[must_use]
    pub fn stored_as(&self, column_type: ColumnType) -> Self {
        Self::from_sql(self.to_sql().as_deref(), column_type)
    }

    /// Returns true if no default clause is set.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Foreign key action (ON DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the action text reported by `pragma_foreign_key_list`.
    #[must_use]
    pub fn from_sql(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// A single-column foreign key reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Referenced table name.
    pub referenced_table: String,
    /// Referenced column name.
    pub referenced_column: String,
    /// Action on delete.
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
}

impl ForeignKeyRef {
    /// Creates a reference with `ON DELETE NO ACTION`.
    #[must_use]
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            referenced_table: table.into(),
            referenced_column: column.into(),
            on_delete: ForeignKeyAction::NoAction,
        }
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }
}

fn default_nullable() -> bool {
    true
}

/// Specification of a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name. Case-sensitive, unique within a table.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column allows NULL values.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "DefaultValue::is_none")]
    pub default: DefaultValue,
    /// Whether this column is the primary key.
    #[serde(default, rename = "primary_key")]
    pub is_primary_key: bool,
    /// Foreign key reference, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyRef>,
}

impl ColumnSpec {
    /// Creates a nullable column without default.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: DefaultValue::None,
            is_primary_key: false,
            foreign_key: None,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = value;
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false; // Primary keys are always NOT NULL
        self
    }

    /// Adds a foreign key reference.
    #[must_use]
    pub fn references(mut self, foreign_key: ForeignKeyRef) -> Self {
        self.foreign_key = Some(foreign_key);
        self
    }

    /// Lists how `other` differs from this column, ignoring the name.
    #[must_use]
    pub fn differences(&self, other: &Self) -> Vec<String> {
        let mut out = Vec::new();
        if self.column_type != other.column_type {
            out.push(format!(
                "column '{}': type {} -> {}",
                self.name,
                self.column_type.as_str(),
                other.column_type.as_str()
            ));
        }
        if self.nullable != other.nullable {
            out.push(format!(
                "column '{}': nullable {} -> {}",
                self.name, self.nullable, other.nullable
            ));
        }
        if self.default != other.default {
            out.push(format!(
                "column '{}': default {:?} -> {:?}",
                self.name, self.default, other.default
            ));
        }
        if self.is_primary_key != other.is_primary_key {
            out.push(format!(
                "column '{}': primary key {} -> {}",
                self.name, self.is_primary_key, other.is_primary_key
            ));
        }
        if self.foreign_key != other.foreign_key {
            out.push(format!(
                "column '{}': foreign key {:?} -> {:?}",
                self.name, self.foreign_key, other.foreign_key
            ));
        }
        out
    }
}

/// An explicitly created index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexShape {
    /// Index name.
    pub name: String,
    /// Indexed columns, in index order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    #[serde(default)]
    pub unique: bool,
}

impl IndexShape {
    /// Creates a non-unique index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Column and index description of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableShape {
    /// Table name.
    pub name: String,
    /// Columns in declared order.
    pub columns: Vec<ColumnSpec>,
    /// Explicitly created indexes.
    #[serde(default)]
    pub indexes: Vec<IndexShape>,
}

impl TableShape {
    /// Creates an empty table shape.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexShape) -> Self {
        self.indexes.push(index);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Gets an index by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&IndexShape> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Returns true if the table has a column with this exact name.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Returns column names in declared order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Lists every way `live` fails to match this shape.
    ///
    /// Columns must match exactly, in order. Every index of this shape must
    /// exist in `live` with the same columns and uniqueness; additional live
    /// indexes are not reported.
    #[must_use]
    pub fn differences(&self, live: &Self) -> Vec<String> {
        let mut out = Vec::new();

        let expected: Vec<&str> = self.column_names().collect();
        let found: Vec<&str> = live.column_names().collect();
        if expected != found {
            out.push(format!(
                "columns: expected [{}], found [{}]",
                expected.join(", "),
                found.join(", ")
            ));
        }

        for column in &self.columns {
            match live.get_column(&column.name) {
                Some(live_column) => out.extend(column.differences(live_column)),
                None => out.push(format!("column '{}': missing", column.name)),
            }
        }

        for index in &self.indexes {
            match live.get_index(&index.name) {
                Some(live_index) if live_index == index => {}
                Some(live_index) => out.push(format!(
                    "index '{}': expected {:?} (unique: {}), found {:?} (unique: {})",
                    index.name, index.columns, index.unique, live_index.columns, live_index.unique
                )),
                None => out.push(format!("index '{}': missing", index.name)),
            }
        }

        out
    }

    /// Parses a shape from JSON.
    ///
    /// Primary key columns are forced to NOT NULL, as with
    /// [`ColumnSpec::primary_key`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut shape: Self = serde_json::from_str(json)?;
        for column in &mut shape.columns {
            if column.is_primary_key {
                column.nullable = false;
            }
        }
        Ok(shape)
    }

    /// Reads a shape from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// Kind of a catalog object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A table.
    Table,
    /// A view.
    View,
    /// An index.
    Index,
    /// A trigger.
    Trigger,
}

impl ObjectKind {
    /// Returns the catalog name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
            Self::Index => "index",
            Self::Trigger => "trigger",
        }
    }

    /// Parses the `type` column of `sqlite_master`.
    #[must_use]
    pub fn from_catalog(raw: &str) -> Option<Self> {
        match raw {
            "table" => Some(Self::Table),
            "view" => Some(Self::View),
            "index" => Some(Self::Index),
            "trigger" => Some(Self::Trigger),
            _ => None,
        }
    }
}

/// An entry of the store catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Object name.
    pub name: String,
    /// Object kind.
    pub kind: ObjectKind,
    /// Table the object belongs to (the object itself for tables and views,
    /// the table or view it fires on for triggers).
    pub table: String,
    /// Defining SQL; `None` for internal auto-indexes.
    pub sql: Option<String>,
}
