//! Schema migrator.
//!
//! Brings a live table in line with a target shape, either by appending
//! columns in place or by rebuilding the table through a shadow table:
//!
//! 1. create a uniquely named shadow table with the desired columns;
//! 2. copy rows through an explicit column projection;
//! 3. drop the source table;
//! 4. rename the shadow table to the source name;
//! 5. recreate the indexes that still apply.
//!
//! Views and triggers are dropped before step 3 and recreated from their
//! catalog SQL after step 5, since SQLite re-resolves them when a table is
//! renamed. A view that no longer resolves against the new columns fails
//! the rebuild.
//!
//! Every multi-statement migration runs in a single transaction that is
//! committed on success and rolled back on any error. After commit the table
//! is inspected again and compared with the requested shape.
//!
//! Migrations assume a single writer: nothing here locks across processes.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Connection, Sqlite, SqliteConnection, Transaction};
use tracing::{debug, error, info};

use crate::dialect::SqliteDialect;
use crate::error::{MigrateError, Result};
use crate::inspector::SchemaInspector;
use crate::observer::{MigrationObserver, RebuildPhase, TracingObserver};
use crate::operations::{ColumnMapping, MigrationOperation};
use crate::plan::{diff_additive, diff_rebuild, validate_columns, MigrationPlan, RenameMap};
use crate::shape::{CatalogEntry, ColumnSpec, ObjectKind, TableShape};

/// How a migration was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Nothing to do.
    Noop,
    /// Columns and indexes added in place.
    Additive,
    /// Table rebuilt through a shadow table.
    Rebuild,
}

/// Summary of a successful migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedResult {
    /// Migrated table.
    pub table: String,
    /// Strategy used.
    pub strategy: Strategy,
    /// Columns introduced.
    pub columns_added: Vec<String>,
    /// Columns dropped with their data.
    pub columns_removed: Vec<String>,
    /// Columns renamed, as (old, new).
    pub columns_renamed: Vec<(String, String)>,
    /// Rows copied into the rebuilt table.
    pub rows_copied: u64,
    /// Indexes created or recreated.
    pub indexes_rebuilt: Vec<String>,
    /// Indexes dropped because their columns were removed.
    pub indexes_dropped: Vec<String>,
    /// Views and triggers recreated around the swap.
    pub dependents_recreated: Vec<String>,
    /// Phases a rebuild went through.
    pub phases: Vec<RebuildPhase>,
    /// Verified live shape after the migration.
    pub shape: TableShape,
}

impl AppliedResult {
    fn new(strategy: Strategy, shape: TableShape) -> Self {
        Self {
            table: shape.name.clone(),
            strategy,
            columns_added: Vec::new(),
            columns_removed: Vec::new(),
            columns_renamed: Vec::new(),
            rows_copied: 0,
            indexes_rebuilt: Vec::new(),
            indexes_dropped: Vec::new(),
            dependents_recreated: Vec::new(),
            phases: Vec::new(),
            shape,
        }
    }
}

/// Reconciles tables with target shapes over a borrowed connection.
///
/// The connection is exclusively borrowed for the lifetime of the migrator;
/// the migrator never opens or closes connections.
pub struct SchemaMigrator<'c, O: MigrationObserver = TracingObserver> {
    conn: &'c mut SqliteConnection,
    dialect: SqliteDialect,
    observer: O,
}

impl<'c> SchemaMigrator<'c, TracingObserver> {
    /// Creates a migrator reporting through `tracing`.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self {
            conn,
            dialect: SqliteDialect::new(),
            observer: TracingObserver,
        }
    }
}

impl<'c, O: MigrationObserver> SchemaMigrator<'c, O> {
    /// Replaces the observer.
    pub fn with_observer<P: MigrationObserver>(self, observer: P) -> SchemaMigrator<'c, P> {
        SchemaMigrator {
            conn: self.conn,
            dialect: self.dialect,
            observer,
        }
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &SqliteDialect {
        &self.dialect
    }

    /// Returns the observer.
    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Returns an inspector over the migrator's connection.
    pub fn inspector(&mut self) -> SchemaInspector<'_> {
        SchemaInspector::new(&mut *self.conn)
    }

    /// Reads the live shape of a table.
    pub async fn inspect(&mut self, table: &str) -> Result<TableShape> {
        self.inspector().table_shape(table).await
    }

    /// Plans an additive migration: desired columns the table lacks.
    pub async fn plan_additive(
        &mut self,
        table: &str,
        desired: &[ColumnSpec],
    ) -> Result<MigrationPlan> {
        let current = self.inspect(table).await?;
        diff_additive(&current, desired)
    }

    /// Plans a full migration towards `desired`, with explicit renames.
    ///
    /// Fails with [`MigrateError::NotFound`] without touching the store if
    /// the table does not exist, and with [`MigrateError::InvalidPlan`] if
    /// the plan needs a rebuild that would lose partial or expression
    /// indexes.
    pub async fn plan_rebuild(
        &mut self,
        table: &str,
        desired: &TableShape,
        renames: &RenameMap,
    ) -> Result<MigrationPlan> {
        let current = self.inspect(table).await?;
        let plan = diff_rebuild(&current, desired, renames)?;
        if plan.requires_rebuild {
            ensure_rebuildable(&mut self.inspector(), table).await?;
        }
        Ok(plan)
    }

    /// Applies an in-place plan: one `ADD COLUMN` per addition, then the
    /// missing indexes, all in one transaction.
    ///
    /// An empty plan succeeds without touching the store.
    pub async fn apply_additive(&mut self, plan: &MigrationPlan) -> Result<AppliedResult> {
        let table = plan.table.as_str();
        if plan.requires_rebuild {
            return Err(MigrateError::InvalidPlan(format!(
                "plan for table '{}' requires a rebuild",
                table
            )));
        }

        validate_columns(table, &plan.additions)?;

        if plan.additions.is_empty() && plan.index_additions.is_empty() {
            debug!(table = %table, "Nothing to add, skipping");
            let shape = self.inspect(table).await?;
            return Ok(AppliedResult::new(Strategy::Noop, shape));
        }

        info!(
            table = %table,
            columns = plan.additions.len(),
            indexes = plan.index_additions.len(),
            "Applying additive migration"
        );

        if let Err(err) =
            add_in_transaction(&mut *self.conn, &self.dialect, &self.observer, plan).await
        {
            self.observer.on_error(table, None, &err);
            return Err(err);
        }

        let live = self.inspect(table).await?;
        let mut differences = Vec::new();
        for column in &plan.additions {
            match live.get_column(&column.name) {
                Some(live_column) => differences.extend(column.differences(live_column)),
                None => differences.push(format!("column '{}': missing", column.name)),
            }
        }
        for index in &plan.index_additions {
            if live.get_index(&index.name) != Some(index) {
                differences.push(format!("index '{}': missing", index.name));
            }
        }
        if !differences.is_empty() {
            error!(
                table = %table,
                after = ?live,
                differences = ?differences,
                "Additive migration did not produce the planned columns"
            );
            let err = MigrateError::Postcondition {
                table: table.to_string(),
                differences,
            };
            self.observer.on_error(table, None, &err);
            return Err(err);
        }

        info!(table = %table, "Additive migration applied");

        let mut result = AppliedResult::new(Strategy::Additive, live);
        result.columns_added = plan.additions.iter().map(|c| c.name.clone()).collect();
        result.indexes_rebuilt = plan.index_additions.iter().map(|i| i.name.clone()).collect();
        Ok(result)
    }

    /// Rebuilds the table into `desired` through a shadow table.
    ///
    /// The plan must have been computed by [`Self::plan_rebuild`] against
    /// the current table; a plan that no longer matches the live table is
    /// rejected with [`MigrateError::Conflict`].
    pub async fn apply_rebuild(
        &mut self,
        plan: &MigrationPlan,
        desired: &TableShape,
    ) -> Result<AppliedResult> {
        let table = plan.table.as_str();
        let mut tracker = PhaseTracker::new(table, &self.observer);

        info!(
            table = %table,
            additions = plan.additions.len(),
            renames = plan.renames.len(),
            removals = plan.removals.len(),
            alterations = plan.alterations.len(),
            "Applying rebuild migration"
        );

        let outcome = rebuild(&mut *self.conn, &self.dialect, plan, desired, &mut tracker).await;
        let done = match outcome {
            Ok(done) => done,
            Err(err) => {
                self.observer.on_error(table, Some(tracker.current()), &err);
                if tracker.began {
                    tracker.enter(RebuildPhase::RolledBack);
                }
                return Err(err);
            }
        };

        let live = match SchemaInspector::new(&mut *self.conn).table_shape(table).await {
            Ok(live) => live,
            Err(err) => {
                self.observer.on_error(table, Some(tracker.current()), &err);
                return Err(err);
            }
        };
        let differences = done.expected.differences(&live);
        if !differences.is_empty() {
            error!(
                table = %table,
                before = ?done.before,
                after = ?live,
                differences = ?differences,
                "Rebuilt table does not match the desired shape"
            );
            let err = MigrateError::Postcondition {
                table: table.to_string(),
                differences,
            };
            self.observer.on_error(table, Some(tracker.current()), &err);
            return Err(err);
        }
        tracker.enter(RebuildPhase::Verified);

        info!(table = %table, rows = done.rows_copied, "Rebuild migration applied");

        let mut result = AppliedResult::new(Strategy::Rebuild, live);
        result.columns_added = plan.additions.iter().map(|c| c.name.clone()).collect();
        result.columns_removed = plan.removals.iter().cloned().collect();
        result.columns_renamed = plan.rename_map().into_iter().collect();
        result.rows_copied = done.rows_copied;
        result.indexes_rebuilt = done.expected.indexes.iter().map(|i| i.name.clone()).collect();
        result.indexes_dropped = done.indexes_dropped;
        result.dependents_recreated = done.dependents;
        result.phases = tracker.history;
        Ok(result)
    }

    /// Adds the desired columns the table lacks.
    pub async fn reconcile_additive(
        &mut self,
        table: &str,
        desired: &[ColumnSpec],
    ) -> Result<AppliedResult> {
        let plan = self.plan_additive(table, desired).await?;
        self.apply_additive(&plan).await
    }

    /// Brings the table to `desired` with the least invasive strategy.
    ///
    /// Plans that only append columns or add indexes are applied in place;
    /// everything else rebuilds the table.
    pub async fn reconcile_rebuild(
        &mut self,
        table: &str,
        desired: &TableShape,
        renames: &RenameMap,
    ) -> Result<AppliedResult> {
        let plan = self.plan_rebuild(table, desired, renames).await?;
        if plan.requires_rebuild {
            self.apply_rebuild(&plan, desired).await
        } else {
            self.apply_additive(&plan).await
        }
    }

    /// Returns the SQL [`Self::apply_additive`] would execute.
    #[must_use]
    pub fn statements_for_additive(&self, plan: &MigrationPlan) -> Vec<String> {
        additive_operations(plan)
            .iter()
            .map(|op| self.dialect.generate_sql(op))
            .collect()
    }

    /// Returns the SQL [`Self::apply_rebuild`] would execute, with a
    /// placeholder shadow table name.
    pub async fn statements_for_rebuild(
        &mut self,
        plan: &MigrationPlan,
        desired: &TableShape,
    ) -> Result<Vec<String>> {
        let mut inspector = self.inspector();
        let current = inspector.table_shape(&plan.table).await?;
        let dependents = inspector.dependents().await?;
        let shadow = format!("_reshape_{}_shadow", plan.table);
        let steps = RebuildSteps::new(plan, &current, desired, &shadow, &dependents);
        Ok(steps
            .operations()
            .map(|op| self.dialect.generate_sql(op))
            .collect())
    }
}

/// Records rebuild phases and reports each transition to the observer.
struct PhaseTracker<'a, O: MigrationObserver> {
    table: &'a str,
    observer: &'a O,
    history: Vec<RebuildPhase>,
    /// Set once the rebuild transaction is open.
    began: bool,
}

impl<'a, O: MigrationObserver> PhaseTracker<'a, O> {
    fn new(table: &'a str, observer: &'a O) -> Self {
        let mut tracker = Self {
            table,
            observer,
            history: Vec::new(),
            began: false,
        };
        tracker.enter(RebuildPhase::Planned);
        tracker
    }

    fn enter(&mut self, phase: RebuildPhase) {
        self.observer.on_phase_enter(self.table, phase);
        self.history.push(phase);
    }

    fn current(&self) -> RebuildPhase {
        self.history.last().copied().unwrap_or(RebuildPhase::Planned)
    }
}

/// The statements of a rebuild, in execution order.
struct RebuildSteps {
    create_shadow: MigrationOperation,
    copy_rows: MigrationOperation,
    drop_source: MigrationOperation,
    rename_shadow: MigrationOperation,
    create_indexes: Vec<MigrationOperation>,
    drop_dependents: Vec<MigrationOperation>,
    recreate_dependents: Vec<MigrationOperation>,
    expected: TableShape,
    indexes_dropped: Vec<String>,
    dependents: Vec<String>,
}

impl RebuildSteps {
    fn new(
        plan: &MigrationPlan,
        current: &TableShape,
        desired: &TableShape,
        shadow: &str,
        dependents: &[CatalogEntry],
    ) -> Self {
        let table = plan.table.as_str();

        let mut projection = plan.projection(current, desired);
        if projection.is_empty() {
            // No column survives; keep the row count.
            projection.push(ColumnMapping::new("rowid", "rowid"));
        }

        let (mut indexes, indexes_dropped) = plan.carried_indexes(current, desired);
        indexes.extend(desired.indexes.iter().cloned());

        // Dropped newest first so triggers on views go before their view.
        let drop_dependents = dependents
            .iter()
            .rev()
            .map(|entry| MigrationOperation::drop_object(entry.kind, &entry.name))
            .collect();
        let mut recreate_dependents: Vec<MigrationOperation> = dependents
            .iter()
            .filter_map(|entry| {
                entry.sql.as_ref().map(|sql| {
                    MigrationOperation::create_object(entry.kind, &entry.name, sql.as_str())
                })
            })
            .collect();
        recreate_dependents.extend(
            dependents
                .iter()
                .filter(|entry| entry.kind == ObjectKind::View)
                .map(|entry| MigrationOperation::check_view(&entry.name)),
        );

        Self {
            create_shadow: MigrationOperation::create_table(shadow, desired.columns.clone()),
            copy_rows: MigrationOperation::copy_rows(table, shadow, projection),
            drop_source: MigrationOperation::drop_table(table),
            rename_shadow: MigrationOperation::rename_table(shadow, table),
            create_indexes: indexes
                .iter()
                .map(|index| MigrationOperation::create_index(table, index.clone()))
                .collect(),
            drop_dependents,
            recreate_dependents,
            expected: TableShape {
                name: table.to_string(),
                columns: desired.columns.clone(),
                indexes,
            },
            indexes_dropped,
            dependents: dependents.iter().map(|entry| entry.name.clone()).collect(),
        }
    }

    fn operations(&self) -> impl Iterator<Item = &MigrationOperation> {
        [&self.create_shadow, &self.copy_rows]
            .into_iter()
            .chain(self.drop_dependents.iter())
            .chain([&self.drop_source, &self.rename_shadow])
            .chain(self.create_indexes.iter())
            .chain(self.recreate_dependents.iter())
    }
}

/// Outcome of a committed rebuild, before verification.
struct RebuildDone {
    before: TableShape,
    expected: TableShape,
    rows_copied: u64,
    indexes_dropped: Vec<String>,
    dependents: Vec<String>,
}

fn additive_operations(plan: &MigrationPlan) -> Vec<MigrationOperation> {
    plan.additions
        .iter()
        .map(|column| MigrationOperation::add_column(&plan.table, column.clone()))
        .chain(
            plan.index_additions
                .iter()
                .map(|index| MigrationOperation::create_index(&plan.table, index.clone())),
        )
        .collect()
}

/// Executes one operation, mapping store rejections to migration errors.
async fn execute(
    conn: &mut SqliteConnection,
    dialect: &SqliteDialect,
    table: &str,
    operation: &MigrationOperation,
) -> Result<u64> {
    let sql = dialect.generate_sql(operation);
    debug!(operation = %operation.describe(), sql = %sql, "Executing SQL");

    match sqlx::query(&sql).execute(&mut *conn).await {
        Ok(done) => Ok(done.rows_affected()),
        Err(source) => Err(statement_error(table, operation, sql, source)),
    }
}

fn statement_error(
    table: &str,
    operation: &MigrationOperation,
    statement: String,
    source: sqlx::Error,
) -> MigrateError {
    let duplicate = matches!(
        &source,
        sqlx::Error::Database(db) if db.message().contains("duplicate column name")
    );
    match operation.column() {
        Some(column) if duplicate => MigrateError::Conflict {
            table: table.to_string(),
            column: Some(column.to_string()),
            reason: "column already exists".to_string(),
        },
        column => MigrateError::Store {
            statement,
            column: column.map(str::to_string),
            source,
        },
    }
}

/// Commits on success, rolls back on error.
async fn finish<T>(tx: Transaction<'_, Sqlite>, table: &str, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            match tx.rollback().await {
                Ok(()) => debug!(table = %table, "Transaction rolled back"),
                Err(rollback_err) => {
                    error!(table = %table, error = %rollback_err, "Rollback failed");
                }
            }
            Err(err)
        }
    }
}

async fn add_in_transaction<O: MigrationObserver>(
    conn: &mut SqliteConnection,
    dialect: &SqliteDialect,
    observer: &O,
    plan: &MigrationPlan,
) -> Result<()> {
    let table = plan.table.as_str();
    let mut tx = conn.begin().await?;
    let result = add_steps(&mut tx, dialect, observer, plan).await;
    finish(tx, table, result).await
}

async fn add_steps<O: MigrationObserver>(
    conn: &mut SqliteConnection,
    dialect: &SqliteDialect,
    observer: &O,
    plan: &MigrationPlan,
) -> Result<()> {
    let table = plan.table.as_str();
    if !SchemaInspector::new(&mut *conn).table_exists(table).await? {
        return Err(MigrateError::table_not_found(table));
    }

    for operation in additive_operations(plan) {
        execute(conn, dialect, table, &operation).await?;
        if let Some(column) = operation.column() {
            observer.on_column_added(table, column);
        }
    }
    Ok(())
}

async fn foreign_keys_enabled(conn: &mut SqliteConnection) -> Result<bool> {
    let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await?;
    Ok(enabled != 0)
}

async fn set_foreign_keys(conn: &mut SqliteConnection, enabled: bool) -> Result<()> {
    let sql = if enabled {
        "PRAGMA foreign_keys = ON"
    } else {
        "PRAGMA foreign_keys = OFF"
    };
    sqlx::query(sql).execute(&mut *conn).await?;
    Ok(())
}

async fn foreign_key_violations(conn: &mut SqliteConnection) -> Result<usize> {
    let rows = sqlx::query("PRAGMA foreign_key_check")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.len())
}

/// Refuses tables whose indexes a rebuild could not recreate.
async fn ensure_rebuildable(inspector: &mut SchemaInspector<'_>, table: &str) -> Result<()> {
    let unsupported = inspector.unsupported_indexes(table).await?;
    if unsupported.is_empty() {
        return Ok(());
    }
    Err(MigrateError::InvalidPlan(format!(
        "table '{}' has partial or expression indexes a rebuild cannot preserve: {}",
        table,
        unsupported.join(", ")
    )))
}

/// Picks a table name not used by any catalog object.
async fn shadow_name(inspector: &mut SchemaInspector<'_>, table: &str) -> Result<String> {
    let taken: Vec<String> = inspector
        .catalog()
        .await?
        .into_iter()
        .map(|entry| entry.name)
        .collect();

    let base = format!("_reshape_{}_{}", table, Utc::now().timestamp_millis());
    let mut name = base.clone();
    let mut suffix = 1;
    while taken.contains(&name) {
        name = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    Ok(name)
}

/// Runs the rebuild with foreign key enforcement suspended.
///
/// SQLite ignores `PRAGMA foreign_keys` inside a transaction, so the switch
/// happens around it and is restored whatever the outcome.
async fn rebuild<O: MigrationObserver>(
    conn: &mut SqliteConnection,
    dialect: &SqliteDialect,
    plan: &MigrationPlan,
    desired: &TableShape,
    tracker: &mut PhaseTracker<'_, O>,
) -> Result<RebuildDone> {
    if desired.name != plan.table {
        return Err(MigrateError::InvalidPlan(format!(
            "desired shape is for table '{}', plan is for '{}'",
            desired.name, plan.table
        )));
    }

    let enforced = foreign_keys_enabled(conn).await?;
    if enforced {
        set_foreign_keys(conn, false).await?;
    }

    let result = rebuild_in_transaction(conn, dialect, plan, desired, enforced, tracker).await;

    if enforced {
        if let Err(err) = set_foreign_keys(conn, true).await {
            error!(table = %plan.table, error = %err, "Failed to re-enable foreign keys");
        }
    }
    result
}

async fn rebuild_in_transaction<O: MigrationObserver>(
    conn: &mut SqliteConnection,
    dialect: &SqliteDialect,
    plan: &MigrationPlan,
    desired: &TableShape,
    check_foreign_keys: bool,
    tracker: &mut PhaseTracker<'_, O>,
) -> Result<RebuildDone> {
    let mut tx = conn.begin().await?;
    tracker.began = true;
    let result = rebuild_steps(&mut tx, dialect, plan, desired, check_foreign_keys, tracker).await;
    finish(tx, &plan.table, result).await
}

async fn rebuild_steps<O: MigrationObserver>(
    conn: &mut SqliteConnection,
    dialect: &SqliteDialect,
    plan: &MigrationPlan,
    desired: &TableShape,
    check_foreign_keys: bool,
    tracker: &mut PhaseTracker<'_, O>,
) -> Result<RebuildDone> {
    let table = plan.table.as_str();

    let mut inspector = SchemaInspector::new(&mut *conn);
    let before = inspector.table_shape(table).await?;

    ensure_rebuildable(&mut inspector, table).await?;

    if diff_rebuild(&before, desired, &plan.rename_map())? != *plan {
        return Err(MigrateError::Conflict {
            table: table.to_string(),
            column: None,
            reason: "table changed since the plan was computed".to_string(),
        });
    }

    let shadow = shadow_name(&mut inspector, table).await?;
    let dependents = inspector.dependents().await?;

    let violations_before = if check_foreign_keys {
        foreign_key_violations(conn).await?
    } else {
        0
    };

    let steps = RebuildSteps::new(plan, &before, desired, &shadow, &dependents);

    execute(conn, dialect, table, &steps.create_shadow).await?;
    tracker.enter(RebuildPhase::ShadowCreated);

    let rows_copied = execute(conn, dialect, table, &steps.copy_rows).await?;
    tracker.enter(RebuildPhase::DataCopied);

    for operation in &steps.drop_dependents {
        execute(conn, dialect, table, operation).await?;
    }
    execute(conn, dialect, table, &steps.drop_source).await?;
    execute(conn, dialect, table, &steps.rename_shadow).await?;
    tracker.enter(RebuildPhase::Swapped);

    for operation in &steps.create_indexes {
        execute(conn, dialect, table, operation).await?;
    }
    for name in &steps.indexes_dropped {
        info!(table = %table, index = %name, "Dropping index on removed column");
    }
    for operation in &steps.recreate_dependents {
        execute(conn, dialect, table, operation).await?;
    }
    tracker.enter(RebuildPhase::IndexesRebuilt);

    if check_foreign_keys {
        let violations = foreign_key_violations(conn).await?;
        if violations > violations_before {
            return Err(MigrateError::Conflict {
                table: table.to_string(),
                column: None,
                reason: format!(
                    "rebuild would leave {} foreign key violation(s)",
                    violations - violations_before
                ),
            });
        }
    }

    Ok(RebuildDone {
        before,
        expected: steps.expected,
        rows_copied,
        indexes_dropped: steps.indexes_dropped,
        dependents: steps.dependents,
    })
}
