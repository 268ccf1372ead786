//! Integration tests for catalog inspection and shape files.

mod common;

use std::io::Write;

use common::{connect, exec, seed_entities};
use oxide_reshape::prelude::*;

async fn seed_library(conn: &mut sqlx::SqliteConnection) {
    exec(
        conn,
        "CREATE TABLE authors (\
            id INTEGER PRIMARY KEY AUTOINCREMENT, \
            name TEXT NOT NULL UNIQUE)",
    )
    .await;
    exec(
        conn,
        "CREATE TABLE books (\
            id INTEGER PRIMARY KEY, \
            author_id INTEGER NOT NULL REFERENCES authors (id) ON DELETE CASCADE, \
            title TEXT NOT NULL DEFAULT 'untitled', \
            price REAL DEFAULT 9.5, \
            in_print BOOLEAN NOT NULL DEFAULT 1, \
            cover BLOB, \
            published_at DATETIME)",
    )
    .await;
    exec(
        conn,
        "CREATE UNIQUE INDEX idx_books_title_author ON books (title, author_id)",
    )
    .await;
    exec(conn, "CREATE INDEX idx_books_lower_title ON books (lower(title))").await;
    exec(
        conn,
        "CREATE VIEW books_in_print AS SELECT id, title FROM books WHERE in_print",
    )
    .await;
}

#[tokio::test]
async fn test_table_shape() {
    let mut conn = connect().await;
    seed_library(&mut conn).await;

    let mut inspector = SchemaInspector::new(&mut conn);
    let shape = inspector.table_shape("books").await.unwrap();

    assert_eq!(
        shape.column_names().collect::<Vec<_>>(),
        vec!["id", "author_id", "title", "price", "in_print", "cover", "published_at"]
    );

    let id = shape.get_column("id").unwrap();
    assert!(id.is_primary_key);
    assert!(!id.nullable);
    assert_eq!(id.column_type, ColumnType::Integer);

    let author = shape.get_column("author_id").unwrap();
    assert!(!author.nullable);
    assert_eq!(
        author.foreign_key,
        Some(ForeignKeyRef::new("authors", "id").on_delete(ForeignKeyAction::Cascade))
    );

    let title = shape.get_column("title").unwrap();
    assert_eq!(title.default, DefaultValue::String("untitled".into()));

    let price = shape.get_column("price").unwrap();
    assert_eq!(price.column_type, ColumnType::Real);
    assert_eq!(price.default, DefaultValue::Float(9.5));
    assert!(price.nullable);

    let in_print = shape.get_column("in_print").unwrap();
    assert_eq!(in_print.column_type, ColumnType::Boolean);
    assert_eq!(in_print.default, DefaultValue::Bool(true));

    assert_eq!(
        shape.get_column("cover").unwrap().column_type,
        ColumnType::Blob
    );
    // Unmapped declared types read as text.
    assert_eq!(
        shape.get_column("published_at").unwrap().column_type,
        ColumnType::Text
    );

    // Expression indexes are not part of the shape.
    assert_eq!(
        shape.indexes,
        vec![IndexShape::new("idx_books_title_author", &["title", "author_id"]).unique()]
    );
    assert_eq!(
        inspector.unsupported_indexes("books").await.unwrap(),
        vec!["idx_books_lower_title"]
    );
}

#[tokio::test]
async fn test_constraint_indexes_are_not_listed() {
    let mut conn = connect().await;
    seed_library(&mut conn).await;

    let shape = SchemaInspector::new(&mut conn)
        .table_shape("authors")
        .await
        .unwrap();

    assert!(shape.indexes.is_empty());
    assert!(!shape.get_column("name").unwrap().nullable);
}

#[tokio::test]
async fn test_missing_table() {
    let mut conn = connect().await;

    let mut inspector = SchemaInspector::new(&mut conn);
    assert!(!inspector.table_exists("ghosts").await.unwrap());

    let err = inspector.table_shape("ghosts").await.unwrap_err();
    assert!(matches!(err, MigrateError::NotFound { .. }));

    let err = inspector.column_exists("ghosts", "id").await.unwrap_err();
    assert!(matches!(err, MigrateError::NotFound { .. }));
}

#[tokio::test]
async fn test_views_are_not_tables() {
    let mut conn = connect().await;
    seed_library(&mut conn).await;

    let mut inspector = SchemaInspector::new(&mut conn);
    assert!(!inspector.table_exists("books_in_print").await.unwrap());
    assert!(inspector.table_shape("books_in_print").await.is_err());
}

#[tokio::test]
async fn test_column_exists() {
    let mut conn = connect().await;
    seed_entities(&mut conn).await;

    let mut inspector = SchemaInspector::new(&mut conn);
    assert!(inspector.column_exists("entities", "name").await.unwrap());
    assert!(!inspector.column_exists("entities", "Name").await.unwrap());
    assert!(!inspector.column_exists("entities", "location").await.unwrap());
}

#[tokio::test]
async fn test_list_tables() {
    let mut conn = connect().await;
    seed_library(&mut conn).await;

    let mut inspector = SchemaInspector::new(&mut conn);

    // AUTOINCREMENT creates sqlite_sequence, which is internal.
    let tables = inspector.list_tables(false).await.unwrap();
    let names: Vec<&str> = tables.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["authors", "books"]);
    assert!(tables.iter().all(|e| e.kind == ObjectKind::Table));

    let with_views = inspector.list_tables(true).await.unwrap();
    let names: Vec<(ObjectKind, &str)> = with_views
        .iter()
        .map(|e| (e.kind, e.name.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            (ObjectKind::Table, "authors"),
            (ObjectKind::Table, "books"),
            (ObjectKind::View, "books_in_print"),
        ]
    );
}

#[tokio::test]
async fn test_catalog() {
    let mut conn = connect().await;
    seed_library(&mut conn).await;

    let catalog = SchemaInspector::new(&mut conn).catalog().await.unwrap();
    let indexes: Vec<&CatalogEntry> = catalog
        .iter()
        .filter(|e| e.kind == ObjectKind::Index)
        .collect();

    assert!(indexes
        .iter()
        .any(|e| e.name == "idx_books_title_author" && e.table == "books" && e.sql.is_some()));
    assert!(indexes
        .iter()
        .any(|e| e.name == "idx_books_lower_title"));

    let view = catalog
        .iter()
        .find(|e| e.kind == ObjectKind::View)
        .unwrap();
    assert!(view.sql.as_deref().unwrap().starts_with("CREATE VIEW"));
}

#[tokio::test]
async fn test_dependents() {
    let mut conn = connect().await;
    seed_library(&mut conn).await;
    exec(
        &mut conn,
        "CREATE TRIGGER trg_books_touch AFTER UPDATE ON books \
         BEGIN UPDATE authors SET name = name WHERE id = NEW.author_id; END",
    )
    .await;

    let mut inspector = SchemaInspector::new(&mut conn);
    let dependents = inspector.dependents().await.unwrap();
    let found: Vec<(ObjectKind, &str, &str)> = dependents
        .iter()
        .map(|e| (e.kind, e.name.as_str(), e.table.as_str()))
        .collect();
    assert_eq!(
        found,
        vec![
            (ObjectKind::View, "books_in_print", "books_in_print"),
            (ObjectKind::Trigger, "trg_books_touch", "books"),
        ]
    );

    // Triggers show up in the catalog but are not tables.
    let catalog = inspector.catalog().await.unwrap();
    assert_eq!(catalog.last().unwrap().kind, ObjectKind::Trigger);
    assert_eq!(inspector.list_tables(true).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_reconcile_from_shape_file() {
    let mut conn = connect().await;
    seed_entities(&mut conn).await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "name": "entities",
            "columns": [
                {{ "name": "id", "type": "INTEGER", "primary_key": true }},
                {{ "name": "full_name", "type": "TEXT", "nullable": false }},
                {{ "name": "verified", "type": "BOOLEAN", "default": {{ "bool": false }} }}
            ],
            "indexes": [
                {{ "name": "idx_entities_verified", "columns": ["verified"], "unique": false }}
            ]
        }}"#
    )
    .unwrap();

    let desired = TableShape::from_json_file(file.path()).unwrap();
    assert!(!desired.get_column("id").unwrap().nullable);

    let mut renames = RenameMap::new();
    renames.insert("name".to_string(), "full_name".to_string());

    let mut migrator = SchemaMigrator::new(&mut conn);
    let result = migrator
        .reconcile_rebuild("entities", &desired, &renames)
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Rebuild);
    assert_eq!(result.columns_added, vec!["verified"]);
    assert_eq!(
        result.shape.column_names().collect::<Vec<_>>(),
        vec!["id", "full_name", "verified"]
    );
    assert!(result.shape.get_index("idx_entities_verified").is_some());
    assert_eq!(
        result.shape.get_index("idx_entities_name").unwrap().columns,
        vec!["full_name"]
    );
}

#[tokio::test]
async fn test_shape_file_errors() {
    let missing = TableShape::from_json_file("/nonexistent/shape.json").unwrap_err();
    assert!(matches!(missing, MigrateError::Io(_)));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "name": "entities", "columns": [{{ "name": "id" }}] }}"#).unwrap();
    let malformed = TableShape::from_json_file(file.path()).unwrap_err();
    assert!(matches!(malformed, MigrateError::Serialization(_)));
}
