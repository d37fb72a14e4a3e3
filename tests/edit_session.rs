//! Edit Session Tests
//!
//! Runs ledger edits through [`SqlChangeGenerator`] with every dialect's real
//! command renderer, so quoting and literal forms are checked end to end.

#![cfg(all(feature = "postgres", feature = "mysql", feature = "sqlserver", feature = "document"))]

use pretty_assertions::assert_eq;

use aion::engine::document::DocumentCommands;
use aion::engine::mysql::MySqlCommands;
use aion::engine::postgres::PostgresCommands;
use aion::engine::sqlserver::SqlServerCommands;
use aion::engine::{DatabaseCommands, Row};
use aion::{ColumnInfo, EditSession, SqlChangeGenerator, Value};

fn people() -> EditSession {
    EditSession::new(
        "t",
        "shop",
        vec![ColumnInfo::new("id", "int").primary_key(), ColumnInfo::new("name", "varchar")],
    )
}

fn row(id: i64, name: &str) -> Row {
    [("id".to_string(), Value::Int(id)), ("name".to_string(), Value::from(name))].into_iter().collect()
}

fn generate(session: &EditSession, commands: &dyn DatabaseCommands) -> Vec<String> {
    let result = SqlChangeGenerator::generate(&session.source, session.state.changes(), commands);
    assert!(result.is_valid(), "{:?}", result.validation_error);
    result.statements
}

#[test]
fn test_update_is_quoted_per_dialect() {
    let mut session = people();
    session.state.update_cell(0, &row(1, "x"), "name", Value::from("y")).unwrap();

    assert_eq!(generate(&session, &PostgresCommands), vec![r#"UPDATE "t" SET "name" = 'y' WHERE "id" = 1"#]);
    assert_eq!(generate(&session, &MySqlCommands), vec!["UPDATE `t` SET `name` = 'y' WHERE `id` = 1"]);
    assert_eq!(generate(&session, &SqlServerCommands), vec!["UPDATE [t] SET [name] = N'y' WHERE [id] = 1"]);
    assert_eq!(generate(&session, &DocumentCommands), vec!["UPDATE t SET name = 'y' WHERE id = 1"]);
}

#[test]
fn test_insert_then_delete_generates_nothing() {
    let mut session = people();
    let values: Row = [("name".to_string(), Value::from("a"))].into_iter().collect();
    session.state.insert_row(3, values).unwrap();
    session.state.delete_row(3, &Row::new());

    assert!(session.state.is_empty());
    let result = SqlChangeGenerator::generate(&session.source, session.state.changes(), &PostgresCommands);
    assert!(result.statements.is_empty());
    assert!(!result.requires_transaction);
}

#[test]
fn test_edited_key_is_addressed_by_original_value() {
    let mut session = people();
    let original = row(1, "x");
    session.state.update_cell(0, &original, "id", Value::Int(10)).unwrap();
    session.state.update_cell(0, &original, "name", Value::from("y")).unwrap();

    assert_eq!(generate(&session, &SqlServerCommands), vec!["UPDATE [t] SET [name] = N'y' WHERE [id] = 1"]);
}

#[test]
fn test_reverted_update_leaves_ledger() {
    let mut session = people();
    let original = row(1, "x");
    session.state.update_cell(0, &original, "name", Value::from("y")).unwrap();
    session.state.update_cell(0, &original, "name", Value::from("x")).unwrap();

    assert!(session.state.is_empty());
}

#[test]
fn test_mixed_batch_requires_transaction() {
    let mut session = people();
    session.state.update_cell(0, &row(1, "O'Brien"), "name", Value::from("O'Neil")).unwrap();
    session.state.delete_row(1, &row(2, "x"));
    let values: Row = [("id".to_string(), Value::Int(3)), ("name".to_string(), Value::Null)].into_iter().collect();
    session.state.insert_row(2, values).unwrap();

    let result = SqlChangeGenerator::generate(&session.source, session.state.changes(), &MySqlCommands);
    assert!(result.requires_transaction);
    assert_eq!(
        result.statements,
        vec![
            "UPDATE `t` SET `name` = 'O''Neil' WHERE `id` = 1".to_string(),
            "DELETE FROM `t` WHERE `id` = 2".to_string(),
            "INSERT INTO `t` (`id`, `name`) VALUES (3, NULL)".to_string(),
        ]
    );
}

#[test]
fn test_document_insert_renders_json_document() {
    let session = {
        let mut session = EditSession::new(
            "people",
            "inventory",
            vec![
                ColumnInfo::new("_id", "String").primary_key().identity(),
                ColumnInfo::new("name", "String"),
                ColumnInfo::new("active", "Boolean"),
            ],
        );
        let values: Row = [
            ("_id".to_string(), Value::from("ignored")),
            ("name".to_string(), Value::from("Ada")),
            ("active".to_string(), Value::Bool(true)),
        ]
        .into_iter()
        .collect();
        session.state.insert_row(0, values).unwrap();
        session
    };

    assert_eq!(
        generate(&session, &DocumentCommands),
        vec![r#"INSERT INTO people VALUES {"name":"Ada","active":true}"#]
    );
}

#[test]
fn test_tables_without_keys_cannot_update() {
    let mut session = EditSession::new("log", "shop", vec![ColumnInfo::new("line", "text")]);
    let original: Row = [("line".to_string(), Value::from("a"))].into_iter().collect();
    session.state.update_cell(0, &original, "line", Value::from("b")).unwrap();

    assert!(!session.has_primary_key());
    let result = SqlChangeGenerator::generate(&session.source, session.state.changes(), &PostgresCommands);
    assert_eq!(
        result.validation_error.as_deref(),
        Some("Cannot generate UPDATE/DELETE statements without primary key columns")
    );
    assert!(result.statements.is_empty());
}

#[test]
fn test_null_key_uses_is_null() {
    let mut session = people();
    let original: Row = [("id".to_string(), Value::Null), ("name".to_string(), Value::from("x"))].into_iter().collect();
    session.state.delete_row(0, &original);

    assert_eq!(generate(&session, &SqlServerCommands), vec!["DELETE FROM [t] WHERE [id] IS NULL"]);
}
