//! Schema inspection.
//!
//! Reads the live structure of tables from the SQLite catalog. Inspection is
//! read-only and never cached: every call queries the catalog again, since the
//! store may have been altered between calls.

use std::collections::BTreeMap;

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::shape::{
    CatalogEntry, ColumnSpec, ColumnType, DefaultValue, ForeignKeyAction, ForeignKeyRef,
    IndexShape, ObjectKind, TableShape,
};

/// Row of `pragma_table_info`: cid, name, type, notnull, dflt_value, pk.
type TableInfoRow = (i64, String, String, i64, Option<String>, i64);

/// Row of `pragma_foreign_key_list`: id, seq, table, from, to, on_delete.
type ForeignKeyRow = (i64, i64, String, String, Option<String>, String);

/// Row of `sqlite_master`: name, type, tbl_name, sql.
type MasterRow = (String, String, String, Option<String>);

/// Reads table shapes and catalog listings from a connection.
pub struct SchemaInspector<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SchemaInspector<'c> {
    /// Creates an inspector over a borrowed connection.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Returns whether a table (not a view) with this name exists.
    pub async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(count > 0)
    }

    /// Reads the current shape of a table.
    ///
    /// Fails with [`MigrateError::NotFound`] if the table does not exist.
    pub async fn table_shape(&mut self, table: &str) -> Result<TableShape> {
        if !self.table_exists(table).await? {
            return Err(MigrateError::table_not_found(table));
        }

        let rows: Vec<TableInfoRow> = sqlx::query_as(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk \
             FROM pragma_table_info(?1) ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut foreign_keys = self.foreign_keys(table).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for (_cid, name, declared, not_null, default, pk) in rows {
            let column_type = ColumnType::from_declared(&declared).unwrap_or_else(|| {
                warn!(
                    table = %table,
                    column = %name,
                    declared = %declared,
                    "Unmapped declared type, reading as TEXT"
                );
                ColumnType::Text
            });
            let is_primary_key = pk > 0;
            columns.push(ColumnSpec {
                foreign_key: foreign_keys.remove(&name),
                name,
                column_type,
                nullable: not_null == 0 && !is_primary_key,
                default: DefaultValue::from_sql(default.as_deref(), column_type),
                is_primary_key,
            });
        }

        let indexes = self.indexes(table).await?;

        debug!(
            table = %table,
            columns = columns.len(),
            indexes = indexes.len(),
            "Inspected table"
        );

        Ok(TableShape {
            name: table.to_string(),
            columns,
            indexes,
        })
    }

    /// Returns true if `table` has a column named `column`.
    ///
    /// Only fails when the table itself is missing.
    pub async fn column_exists(&mut self, table: &str, column: &str) -> Result<bool> {
        Ok(self.table_shape(table).await?.has_column(column))
    }

    /// Lists tables and, optionally, views, sorted by kind then name.
    ///
    /// SQLite's internal `sqlite_*` objects are excluded.
    pub async fn list_tables(&mut self, include_views: bool) -> Result<Vec<CatalogEntry>> {
        let entries = self.catalog().await?;
        Ok(entries
            .into_iter()
            .filter(|e| match e.kind {
                ObjectKind::Table => true,
                ObjectKind::View => include_views,
                ObjectKind::Index | ObjectKind::Trigger => false,
            })
            .collect())
    }

    /// Lists every table, view, index and trigger with its defining SQL,
    /// sorted by kind then name.
    pub async fn catalog(&mut self) -> Result<Vec<CatalogEntry>> {
        let rows: Vec<MasterRow> = sqlx::query_as(
            "SELECT name, type, tbl_name, sql FROM sqlite_master \
             WHERE type IN ('table', 'view', 'index', 'trigger') AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&mut *self.conn)
        .await?;

        let mut entries = catalog_entries(rows);
        entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Lists views and triggers in creation order.
    ///
    /// SQLite validates these against the whole schema whenever a table is
    /// renamed, so a rebuild sets them aside around the swap.
    pub async fn dependents(&mut self) -> Result<Vec<CatalogEntry>> {
        let rows: Vec<MasterRow> = sqlx::query_as(
            "SELECT name, type, tbl_name, sql FROM sqlite_master \
             WHERE type IN ('view', 'trigger') AND sql IS NOT NULL ORDER BY rowid",
        )
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(catalog_entries(rows))
    }

    /// Returns the names of indexes on `table` that a [`TableShape`] cannot
    /// describe (partial indexes and indexes on expressions).
    pub async fn unsupported_indexes(&mut self, table: &str) -> Result<Vec<String>> {
        let list: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT name, origin, partial FROM pragma_index_list(?1) ORDER BY name",
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut unsupported = Vec::new();
        for (name, origin, partial) in list {
            if origin != "c" {
                continue;
            }
            if partial != 0 || self.index_columns(&name).await?.is_none() {
                unsupported.push(name);
            }
        }
        Ok(unsupported)
    }

    /// Reads the explicitly created, plain-column indexes of a table.
    async fn indexes(&mut self, table: &str) -> Result<Vec<IndexShape>> {
        let list: Vec<(String, i64, String, i64)> = sqlx::query_as(
            "SELECT name, \"unique\", origin, partial FROM pragma_index_list(?1) ORDER BY name",
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut indexes = Vec::new();
        for (name, unique, origin, partial) in list {
            // Auto-indexes backing UNIQUE / PRIMARY KEY constraints come with
            // the table definition.
            if origin != "c" {
                continue;
            }
            if partial != 0 {
                warn!(table = %table, index = %name, "Partial index is not part of the shape");
                continue;
            }
            match self.index_columns(&name).await? {
                Some(columns) => indexes.push(IndexShape {
                    name,
                    columns,
                    unique: unique != 0,
                }),
                None => {
                    warn!(
                        table = %table,
                        index = %name,
                        "Expression index is not part of the shape"
                    );
                }
            }
        }
        Ok(indexes)
    }

    /// Returns the indexed column names, or `None` if any key is an
    /// expression.
    async fn index_columns(&mut self, index: &str) -> Result<Option<Vec<String>>> {
        let rows: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                .bind(index)
                .fetch_all(&mut *self.conn)
                .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Reads single-column foreign keys, keyed by the referencing column.
    async fn foreign_keys(&mut self, table: &str) -> Result<BTreeMap<String, ForeignKeyRef>> {
        let rows: Vec<ForeignKeyRow> = sqlx::query_as(
            "SELECT id, seq, \"table\", \"from\", \"to\", on_delete \
             FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut arity: BTreeMap<i64, usize> = BTreeMap::new();
        for row in &rows {
            *arity.entry(row.0).or_default() += 1;
        }

        let mut out = BTreeMap::new();
        for (id, _seq, parent, from, to, on_delete) in rows {
            if arity.get(&id).copied().unwrap_or(0) > 1 {
                warn!(
                    table = %table,
                    column = %from,
                    references = %parent,
                    "Composite foreign key is not part of the shape"
                );
                continue;
            }
            let referenced_column = match to {
                Some(to) => to,
                None => self.primary_key_column(&parent).await?.unwrap_or_default(),
            };
            out.insert(
                from,
                ForeignKeyRef {
                    referenced_table: parent,
                    referenced_column,
                    on_delete: ForeignKeyAction::from_sql(&on_delete),
                },
            );
        }
        Ok(out)
    }

    /// Returns the first primary key column of `table`, if any.
    async fn primary_key_column(&mut self, table: &str) -> Result<Option<String>> {
        let name: Option<String> = sqlx::query_scalar(
            "SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk LIMIT 1",
        )
        .bind(table)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(name)
    }
}

fn catalog_entries(rows: Vec<MasterRow>) -> Vec<CatalogEntry> {
    rows.into_iter()
        .filter_map(|(name, kind, table, sql)| {
            ObjectKind::from_catalog(&kind).map(|kind| CatalogEntry {
                name,
                kind,
                table,
                sql,
            })
        })
        .collect()
}
