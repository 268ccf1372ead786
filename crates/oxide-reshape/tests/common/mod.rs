#![allow(dead_code)]

use std::sync::Mutex;

use oxide_reshape::prelude::*;
use sqlx::{Connection, SqliteConnection};

/// Opens a fresh in-memory database (foreign keys enforced).
pub async fn connect() -> SqliteConnection {
    SqliteConnection::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database")
}

pub async fn exec(conn: &mut SqliteConnection, sql: &str) {
    sqlx::query(sql)
        .execute(&mut *conn)
        .await
        .unwrap_or_else(|e| panic!("Failed to execute: {sql}\nError: {e:?}"));
}

/// Creates `entities(id, name)` with two rows and an index on `name`.
pub async fn seed_entities(conn: &mut SqliteConnection) {
    exec(
        conn,
        "CREATE TABLE entities (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    )
    .await;
    exec(conn, "CREATE INDEX idx_entities_name ON entities (name)").await;
    exec(
        conn,
        "INSERT INTO entities (id, name) VALUES (1, 'Ada'), (2, 'Grace')",
    )
    .await;
}

/// Desired shape of `entities` after renaming `name` to `full_name`.
pub fn entities_renamed() -> TableShape {
    TableShape::new("entities")
        .column(ColumnSpec::new("id", ColumnType::Integer).primary_key())
        .column(ColumnSpec::new("full_name", ColumnType::Text).not_null())
}

pub fn renames(pairs: &[(&str, &str)]) -> RenameMap {
    pairs
        .iter()
        .map(|(old, new)| (old.to_string(), new.to_string()))
        .collect()
}

/// Every catalog object with its defining SQL, for before/after comparison.
pub async fn catalog_snapshot(conn: &mut SqliteConnection) -> Vec<(String, String, Option<String>)> {
    sqlx::query_as("SELECT type, name, sql FROM sqlite_master ORDER BY type, name")
        .fetch_all(&mut *conn)
        .await
        .expect("Failed to read catalog")
}

pub async fn entity_rows(conn: &mut SqliteConnection, name_column: &str) -> Vec<(i64, String)> {
    let sql = format!("SELECT id, \"{name_column}\" FROM entities ORDER BY id");
    sqlx::query_as(&sql)
        .fetch_all(&mut *conn)
        .await
        .unwrap_or_else(|e| panic!("Failed to read rows: {sql}\nError: {e:?}"))
}

pub async fn foreign_keys_enforced(conn: &mut SqliteConnection) -> bool {
    let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await
        .expect("Failed to read foreign_keys");
    enabled == 1
}

pub async fn shadow_tables(conn: &mut SqliteConnection) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE name LIKE '\\_reshape\\_%' ESCAPE '\\'")
        .fetch_all(&mut *conn)
        .await
        .expect("Failed to read catalog")
}

/// Observer that records every event it receives.
#[derive(Default)]
pub struct RecordingObserver {
    pub phases: Mutex<Vec<RebuildPhase>>,
    pub added: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(Option<RebuildPhase>, String)>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<RebuildPhase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(Option<RebuildPhase>, String)> {
        self.errors.lock().unwrap().clone()
    }
}

impl MigrationObserver for RecordingObserver {
    fn on_phase_enter(&self, _table: &str, phase: RebuildPhase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn on_column_added(&self, _table: &str, column: &str) {
        self.added.lock().unwrap().push(column.to_string());
    }

    fn on_error(&self, _table: &str, phase: Option<RebuildPhase>, error: &MigrateError) {
        self.errors.lock().unwrap().push((phase, error.to_string()));
    }
}
