//! Document Store End-to-End Tests
//!
//! Uses the real [`DocumentProvider`] over a scratch file, driven through the
//! orchestrator exactly as a workbench session would.

#![cfg(feature = "document")]

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use aion::config::JsonFileStore;
use aion::engine::document::DocumentProvider;
use aion::{
    Connection, ConnectionManager, ConnectionSet, ConnectionState, DatabaseType, EventBus, ProviderRegistry, Query,
    Value,
};

struct Workspace {
    manager: ConnectionManager,
    connection_id: uuid::Uuid,
    dir: tempfile::TempDir,
}

async fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let providers = Arc::new(ProviderRegistry::new().with_provider(Arc::new(DocumentProvider::new())));
    let store = Arc::new(JsonFileStore::<Connection>::new(dir.path().join("connections.json")));
    let manager = ConnectionManager::new(Arc::new(ConnectionSet::new()), providers, EventBus::default(), store);

    let cs = format!("Filename={}", dir.path().join("inventory.db").display());
    let connection = manager
        .add_connection(Connection::new("inventory", DatabaseType::Document, cs).saved())
        .await
        .unwrap();
    Workspace { manager, connection_id: connection.id, dir }
}

async fn run(ws: &Workspace, sql: &str) -> aion::QueryResult {
    let mut query = Query::new("q", sql, ws.connection_id, "inventory");
    let result = ws.manager.execute_query(&mut query, &CancellationToken::new()).await;
    assert!(result.is_success(), "{sql}: {:?}", result.error);
    result
}

#[tokio::test]
async fn test_connect_reports_file_stem_database() {
    let ws = workspace().await;
    let connection = ws.manager.connections().get(ws.connection_id).unwrap();

    assert_eq!(connection.state, ConnectionState::Active);
    assert_eq!(connection.databases[0].name, "inventory");
}

#[tokio::test]
async fn test_saved_connection_survives_reload() {
    let ws = workspace().await;
    let dir = ws.dir.path().to_path_buf();

    let store = Arc::new(JsonFileStore::<Connection>::new(dir.join("connections.json")));
    let reloaded = ConnectionManager::new(
        Arc::new(ConnectionSet::new()),
        Arc::new(ProviderRegistry::new()),
        EventBus::default(),
        store,
    );
    assert_eq!(reloaded.initialize().unwrap(), 1);
    let connection = reloaded.connections().get(ws.connection_id).unwrap();
    assert_eq!(connection.state, ConnectionState::Unknown);
    assert!(connection.databases.is_empty());
}

#[tokio::test]
async fn test_catalog_reflects_inserted_documents() {
    let ws = workspace().await;
    run(&ws, r#"INSERT INTO people VALUES {"name": "Ada", "address": {"city": "London"}}"#).await;

    let tables = ws.manager.load_tables(ws.connection_id, "inventory").await.unwrap();
    assert_eq!(tables, vec!["people".to_string()]);

    let columns = ws.manager.load_columns(ws.connection_id, "inventory", "people").await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["_id", "name", "address.city"]);
    assert!(columns[0].is_primary_key);
}

#[tokio::test]
async fn test_edit_session_round_trip() {
    let ws = workspace().await;
    run(&ws, r#"INSERT INTO people VALUES {"_id": "p1", "name": "Ada", "age": 36}"#).await;
    run(&ws, r#"INSERT INTO people VALUES {"_id": "p2", "name": "Linus", "age": 54}"#).await;

    let mut query = ws
        .manager
        .open_table_editor(ws.connection_id, "inventory", "people", &CancellationToken::new())
        .await
        .unwrap();
    let rows = query.result.clone().unwrap().rows;
    assert_eq!(rows.len(), 2);

    let first = rows.iter().position(|r| r["_id"] == Value::from("p1")).unwrap();
    let second = rows.iter().position(|r| r["_id"] == Value::from("p2")).unwrap();
    let edit = query.edit.as_mut().unwrap();
    edit.state.update_cell(first, &rows[first], "age", Value::Int(37)).unwrap();
    edit.state.delete_row(second, &rows[second]);
    let mut added = aion::engine::Row::new();
    added.insert("name".to_string(), Value::from("Grace"));
    edit.state.insert_row(rows.len(), added).unwrap();

    assert_eq!(ws.manager.apply_pending_changes(&mut query).await.unwrap(), 3);

    // The editor grid is reloaded from the store
    let refreshed = query.result.as_ref().unwrap();
    let mut names: Vec<&Value> = refreshed.rows.iter().map(|r| &r["name"]).collect();
    names.sort_by_key(|v| v.to_string());
    assert_eq!(names, vec![&Value::from("Ada"), &Value::from("Grace")]);
    assert!(refreshed.rows.iter().any(|r| r["age"] == Value::Int(37)));

    let ada = run(&ws, "SELECT $ FROM people WHERE _id = 'p1'").await;
    assert_eq!(ada.rows[0]["age"], Value::Int(37));
    let gone = run(&ws, "SELECT $ FROM people WHERE _id = 'p2'").await;
    assert!(gone.rows.is_empty());
    let grace = run(&ws, "SELECT $ FROM people WHERE name = 'Grace'").await;
    assert_eq!(grace.rows.len(), 1);
}

#[tokio::test]
async fn test_failed_edit_batch_in_open_transaction_leaves_no_trace() {
    let ws = workspace().await;
    run(&ws, r#"INSERT INTO people VALUES {"_id": "p1", "name": "Ada"}"#).await;

    let cancel = CancellationToken::new();
    let mut query = ws.manager.open_table_editor(ws.connection_id, "inventory", "people", &cancel).await.unwrap();
    ws.manager.begin_transaction(&mut query).await.unwrap();

    // Keys are written explicitly, so the second insert collides with p1
    let edit = query.edit.as_mut().unwrap();
    edit.source.columns[0].is_identity = false;
    let mut fresh = aion::engine::Row::new();
    fresh.insert("_id".to_string(), Value::from("p2"));
    fresh.insert("name".to_string(), Value::from("Grace"));
    edit.state.insert_row(1, fresh).unwrap();
    let mut clash = aion::engine::Row::new();
    clash.insert("_id".to_string(), Value::from("p1"));
    clash.insert("name".to_string(), Value::from("Clash"));
    edit.state.insert_row(2, clash).unwrap();

    assert!(ws.manager.apply_pending_changes(&mut query).await.is_err());
    assert!(query.active_transaction().is_some());
    ws.manager.commit_transaction(&mut query).await.unwrap();

    let people = run(&ws, "SELECT $ FROM people").await;
    assert_eq!(people.rows.len(), 1);
    assert_eq!(people.rows[0]["name"], Value::from("Ada"));
}

#[tokio::test]
async fn test_query_transaction_commits_and_rolls_back() {
    let ws = workspace().await;
    let cancel = CancellationToken::new();

    let mut query = Query::new("tx", r#"INSERT INTO items VALUES {"sku": "a"}"#, ws.connection_id, "inventory");
    query.use_transaction = true;
    ws.manager.execute_query(&mut query, &cancel).await;
    ws.manager.rollback_transaction(&mut query).await.unwrap();
    assert!(run(&ws, "SELECT $ FROM items").await.rows.is_empty());

    let mut query = Query::new("tx", r#"INSERT INTO items VALUES {"sku": "b"}"#, ws.connection_id, "inventory");
    query.use_transaction = true;
    ws.manager.execute_query(&mut query, &cancel).await;
    ws.manager.commit_transaction(&mut query).await.unwrap();

    let items = run(&ws, "SELECT $ FROM items").await;
    assert_eq!(items.rows.len(), 1);
    assert_eq!(items.rows[0]["sku"], Value::from("b"));
}

#[tokio::test]
async fn test_parse_errors_do_not_fail_connection() {
    let ws = workspace().await;
    let mut query = Query::new("q", "TRUNCATE people", ws.connection_id, "inventory");
    let result = ws.manager.execute_query(&mut query, &CancellationToken::new()).await;

    assert!(result.error.is_some());
    let connection = ws.manager.connections().get(ws.connection_id).unwrap();
    assert_eq!(connection.state, ConnectionState::Active);
}
