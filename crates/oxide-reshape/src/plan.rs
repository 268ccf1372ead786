//! Migration planning.
//!
//! A [`MigrationPlan`] is the delta between a table's live shape and the
//! shape the caller asked for. Plans are computed from two [`TableShape`]s by
//! pure functions, used once by the migrator and then discarded.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::operations::ColumnMapping;
use crate::shape::{ColumnSpec, DefaultValue, IndexShape, TableShape};

/// Caller-supplied column renames, old name -> new name.
pub type RenameMap = BTreeMap<String, String>;

/// The changes needed to bring a table in line with a desired shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Table the plan applies to.
    pub table: String,
    /// Columns to introduce, in desired order.
    pub additions: Vec<ColumnSpec>,
    /// Columns to drop, with their data.
    pub removals: BTreeSet<String>,
    /// Renamed columns: old name -> new column definition.
    pub renames: BTreeMap<String, ColumnSpec>,
    /// Retained columns whose definition changes.
    pub alterations: Vec<ColumnSpec>,
    /// Desired indexes missing from the live table.
    pub index_additions: Vec<IndexShape>,
    /// Whether the plan can only be applied by rebuilding the table.
    pub requires_rebuild: bool,
}

impl MigrationPlan {
    /// Creates an empty plan for a table.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Returns true if applying the plan would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
            && self.removals.is_empty()
            && self.renames.is_empty()
            && self.alterations.is_empty()
            && self.index_additions.is_empty()
            && !self.requires_rebuild
    }

    /// Returns the renames as old name -> new name.
    #[must_use]
    pub fn rename_map(&self) -> RenameMap {
        self.renames
            .iter()
            .map(|(old, column)| (old.clone(), column.name.clone()))
            .collect()
    }

    /// Builds the column-to-column projection used to copy rows from the
    /// `current` table into a table of the `desired` shape.
    ///
    /// Retained columns are copied by name, renamed columns from their old
    /// name, and added columns are left out so they take their default.
    #[must_use]
    pub fn projection(&self, current: &TableShape, desired: &TableShape) -> Vec<ColumnMapping> {
        let renamed_from: BTreeMap<&str, &str> = self
            .renames
            .iter()
            .map(|(old, column)| (column.name.as_str(), old.as_str()))
            .collect();

        desired
            .columns
            .iter()
            .filter_map(|column| {
                if let Some(old) = renamed_from.get(column.name.as_str()) {
                    Some(ColumnMapping::new(*old, &column.name))
                } else if current.has_column(&column.name)
                    && !self.renames.contains_key(&column.name)
                {
                    Some(ColumnMapping::new(&column.name, &column.name))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Maps the indexes of the `current` table onto the rebuilt table.
    ///
    /// Returns the indexes to recreate (column names renamed where needed)
    /// and the names of indexes that reference removed columns. Indexes the
    /// `desired` shape redefines under the same name are left to the desired
    /// shape.
    #[must_use]
    pub fn carried_indexes(
        &self,
        current: &TableShape,
        desired: &TableShape,
    ) -> (Vec<IndexShape>, Vec<String>) {
        let mut carried = Vec::new();
        let mut dropped = Vec::new();

        for index in &current.indexes {
            if desired.get_index(&index.name).is_some() {
                continue;
            }
            let columns: Option<Vec<String>> = index
                .columns
                .iter()
                .map(|column| {
                    if let Some(renamed) = self.renames.get(column) {
                        Some(renamed.name.clone())
                    } else if self.removals.contains(column) {
                        None
                    } else {
                        Some(column.clone())
                    }
                })
                .collect();
            match columns {
                Some(columns) => carried.push(IndexShape {
                    name: index.name.clone(),
                    columns,
                    unique: index.unique,
                }),
                None => dropped.push(index.name.clone()),
            }
        }

        (carried, dropped)
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "{}: up to date", self.table);
        }
        let strategy = if self.requires_rebuild {
            "rebuild"
        } else {
            "in place"
        };
        writeln!(f, "{} ({}):", self.table, strategy)?;
        for column in &self.additions {
            writeln!(f, "  + {} {}", column.name, column.column_type.as_str())?;
        }
        for (old, column) in &self.renames {
            writeln!(f, "  ~ {} -> {}", old, column.name)?;
        }
        for column in &self.alterations {
            writeln!(f, "  * {} {}", column.name, column.column_type.as_str())?;
        }
        for name in &self.removals {
            writeln!(f, "  - {}", name)?;
        }
        for index in &self.index_additions {
            writeln!(f, "  + index {} ({})", index.name, index.columns.join(", "))?;
        }
        Ok(())
    }
}

/// Rejects duplicate column names and defaults that would not read back
/// unchanged from the catalog.
pub(crate) fn validate_columns(table: &str, columns: &[ColumnSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column.name.as_str()) {
            return Err(MigrateError::InvalidPlan(format!(
                "column '{}' is listed twice for table '{}'",
                column.name, table
            )));
        }
        let stored = column.default.stored_as(column.column_type);
        if stored != column.default {
            return Err(MigrateError::InvalidPlan(format!(
                "default {:?} of column '{}.{}' would be stored as {:?} in a {} column",
                column.default,
                table,
                column.name,
                stored,
                column.column_type.as_str()
            )));
        }
    }
    Ok(())
}

/// Returns true if SQLite cannot append this column with `ADD COLUMN`.
fn needs_rebuild_to_add(column: &ColumnSpec) -> bool {
    column.is_primary_key
        || (!column.nullable && matches!(column.default, DefaultValue::None | DefaultValue::Null))
}

/// Computes an additive plan: desired columns missing from `current`.
///
/// Existing columns are never touched, even when their definition differs.
pub fn diff_additive(current: &TableShape, desired: &[ColumnSpec]) -> Result<MigrationPlan> {
    validate_columns(&current.name, desired)?;

    let mut plan = MigrationPlan::new(&current.name);
    plan.additions = desired
        .iter()
        .filter(|column| !current.has_column(&column.name))
        .cloned()
        .collect();
    Ok(plan)
}

/// Computes a full plan including renames, removals and alterations.
pub fn diff_rebuild(
    current: &TableShape,
    desired: &TableShape,
    renames: &RenameMap,
) -> Result<MigrationPlan> {
    let table = current.name.as_str();
    if desired.name != current.name {
        return Err(MigrateError::InvalidPlan(format!(
            "desired shape is for table '{}', not '{}'",
            desired.name, table
        )));
    }
    validate_columns(table, &desired.columns)?;

    // old -> new, identity renames dropped
    let renames: BTreeMap<&str, &str> = renames
        .iter()
        .filter(|(old, new)| old != new)
        .map(|(old, new)| (old.as_str(), new.as_str()))
        .collect();

    let mut targets = BTreeMap::new();
    for (&old, &new) in &renames {
        if !current.has_column(old) {
            return Err(MigrateError::column_not_found(table, old));
        }
        if !desired.has_column(new) {
            return Err(MigrateError::InvalidPlan(format!(
                "rename target '{}' is not a column of the desired shape",
                new
            )));
        }
        if current.has_column(new) && !renames.contains_key(new) {
            return Err(MigrateError::Conflict {
                table: table.to_string(),
                column: Some(new.to_string()),
                reason: format!("cannot rename '{}': the column already exists", old),
            });
        }
        if let Some(other) = targets.insert(new, old) {
            return Err(MigrateError::InvalidPlan(format!(
                "columns '{}' and '{}' are both renamed to '{}'",
                other, old, new
            )));
        }
    }

    for index in &desired.indexes {
        if let Some(column) = index.columns.iter().find(|c| !desired.has_column(c)) {
            return Err(MigrateError::InvalidPlan(format!(
                "index '{}' references unknown column '{}'",
                index.name, column
            )));
        }
    }

    let mut plan = MigrationPlan::new(table);

    for column in &desired.columns {
        if let Some(&old) = targets.get(column.name.as_str()) {
            plan.renames.insert(old.to_string(), column.clone());
        } else if !renames.contains_key(column.name.as_str()) {
            match current.get_column(&column.name) {
                Some(existing) if existing.differences(column).is_empty() => {}
                Some(_) => plan.alterations.push(column.clone()),
                None => plan.additions.push(column.clone()),
            }
        } else {
            // The old column was renamed away and a new one reuses its name.
            plan.additions.push(column.clone());
        }
    }

    plan.removals = current
        .columns
        .iter()
        .filter(|c| !renames.contains_key(c.name.as_str()) && !desired.has_column(&c.name))
        .map(|c| c.name.clone())
        .collect();

    let mut index_redefined = false;
    for index in &desired.indexes {
        match current.get_index(&index.name) {
            Some(existing) if existing == index => {}
            Some(_) => index_redefined = true,
            None => plan.index_additions.push(index.clone()),
        }
    }

    // Order an in-place migration would leave behind.
    let in_place: Vec<&str> = current
        .columns
        .iter()
        .filter(|c| !plan.removals.contains(&c.name))
        .map(|c| renames.get(c.name.as_str()).copied().unwrap_or(c.name.as_str()))
        .chain(plan.additions.iter().map(|c| c.name.as_str()))
        .collect();
    let order_changed = !desired.column_names().eq(in_place.iter().copied());

    plan.requires_rebuild = !plan.removals.is_empty()
        || !plan.renames.is_empty()
        || !plan.alterations.is_empty()
        || order_changed
        || index_redefined
        || plan.additions.iter().any(needs_rebuild_to_add);

    Ok(plan)
}
