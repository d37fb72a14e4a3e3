//! Collection storage on a single `SQLite` file
//!
//! Every collection is a table `(_id TEXT PRIMARY KEY, doc TEXT NOT NULL)`
//! holding the document body as JSON without its `_id`. Filters and updates
//! are pushed down to `json_extract` / `json_set`.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::query::{DocumentStatement, Predicate, SavepointAction};
use crate::engine::{ColumnInfo, QueryResult, Row, Value};
use crate::error::{AionError, Result};

pub const ID_FIELD: &str = "_id";

/// Documents sampled when inferring a collection's columns
const COLUMN_SAMPLE: u32 = 100;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )
    .map_err(|e| AionError::connection_failed(format!("Failed to open document store '{path}': {e}")))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| AionError::connection_failed(format!("Failed to set busy timeout: {e}")))?;
    Ok(conn)
}

fn engine_error(e: &rusqlite::Error) -> AionError {
    AionError::engine_error("document", e.to_string())
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Collections in name order, hiding internal tables
pub fn collections(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .map_err(|e| engine_error(&e))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| engine_error(&e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| engine_error(&e))?;
    Ok(names.into_iter().filter(|n| !n.starts_with('$') && !n.starts_with("sqlite_")).collect())
}

fn collection_exists(conn: &Connection, collection: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [collection],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(|e| engine_error(&e))
}

fn ensure_collection(conn: &Connection, collection: &str) -> Result<()> {
    if collection.starts_with('$') || collection.starts_with("sqlite_") {
        return Err(AionError::invalid_input(format!("'{collection}' is a reserved collection name")));
    }
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({ID_FIELD} TEXT PRIMARY KEY, doc TEXT NOT NULL)",
        quote(collection)
    ))
    .map_err(|e| engine_error(&e))
}

/// `$.a.b` JSON path for a dotted field path
fn json_path(path: &str) -> String {
    path.split('.').fold(String::from("$"), |mut out, segment| {
        out.push('.');
        if !segment.is_empty() && segment.chars().all(|c| c.is_alphanumeric() || c == '_') {
            out.push_str(segment);
        } else {
            out.push('"');
            out.push_str(&segment.replace('"', "\\\""));
            out.push('"');
        }
        out
    })
}

/// Bind form matching what `json_extract` returns for the stored value
fn bind_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::UInt(v) => i64::try_from(*v).map_or_else(|_| SqlValue::Real(*v as f64), SqlValue::Integer),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Json(v) => SqlValue::Text(v.to_string()),
        other => match other.to_json() {
            serde_json::Value::String(s) => SqlValue::Text(s),
            json => SqlValue::Text(json.to_string()),
        },
    }
}

fn where_sql(filter: &[Predicate], params: &mut Vec<SqlValue>) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let clauses: Vec<String> = filter
        .iter()
        .map(|predicate| {
            let target = if predicate.path == ID_FIELD {
                ID_FIELD.to_string()
            } else {
                params.push(SqlValue::Text(json_path(&predicate.path)));
                "json_extract(doc, ?)".to_string()
            };
            if predicate.value.is_null() {
                format!("{target} IS NULL")
            } else {
                params.push(bind_value(&predicate.value));
                format!("{target} = ?")
            }
        })
        .collect();
    format!(" WHERE {}", clauses.join(" AND "))
}

/// Run a script, returning the result of its last statement
pub fn execute_script(conn: &Connection, statements: &[DocumentStatement], cancel: &CancellationToken) -> Result<QueryResult> {
    let mut last = QueryResult::affected(0);
    for statement in statements {
        if cancel.is_cancelled() {
            return Ok(QueryResult::cancelled());
        }
        last = execute(conn, statement, cancel)?;
        if last.cancelled {
            return Ok(last);
        }
    }
    Ok(last)
}

fn execute(conn: &Connection, statement: &DocumentStatement, cancel: &CancellationToken) -> Result<QueryResult> {
    match statement {
        DocumentStatement::Select { collection, filter, limit } => {
            if !collection_exists(conn, collection)? {
                return Ok(QueryResult::rows(Vec::new(), Vec::new()));
            }
            let mut params = Vec::new();
            let mut sql = format!("SELECT {ID_FIELD}, doc FROM {}{}", quote(collection), where_sql(filter, &mut params));
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            select_documents(conn, &sql, params, cancel)
        }
        DocumentStatement::Count { collection, filter } => {
            let count = if collection_exists(conn, collection)? {
                let mut params = Vec::new();
                let sql = format!("SELECT COUNT(*) FROM {}{}", quote(collection), where_sql(filter, &mut params));
                conn.query_row(&sql, params_from_iter(params), |row| row.get::<_, i64>(0))
                    .map_err(|e| engine_error(&e))?
            } else {
                0
            };
            let mut row = Row::new();
            row.insert("count".to_string(), Value::Int(count));
            Ok(QueryResult::rows(vec!["count".to_string()], vec![row]))
        }
        DocumentStatement::Insert { collection, document } => {
            ensure_collection(conn, collection)?;
            let mut body = document.clone();
            let id = match body.shift_remove(ID_FIELD) {
                Some(serde_json::Value::String(id)) => id,
                Some(serde_json::Value::Null) | None => uuid::Uuid::new_v4().to_string(),
                Some(other) => other.to_string(),
            };
            let doc = serde_json::Value::Object(body).to_string();
            conn.execute(
                &format!("INSERT INTO {} ({ID_FIELD}, doc) VALUES (?1, ?2)", quote(collection)),
                [&id, &doc],
            )
            .map_err(|e| engine_error(&e))?;
            Ok(QueryResult::affected(1))
        }
        DocumentStatement::Update { collection, assignments, filter } => {
            if assignments.iter().any(|(path, _)| path == ID_FIELD) {
                return Err(AionError::invalid_input("_id cannot be updated"));
            }
            if !collection_exists(conn, collection)? {
                return Ok(QueryResult::affected(0));
            }
            let mut params = Vec::new();
            let mut setters = Vec::new();
            for (path, value) in assignments {
                setters.push("?, json(?)");
                params.push(SqlValue::Text(json_path(path)));
                params.push(SqlValue::Text(value.to_json().to_string()));
            }
            let sql = format!(
                "UPDATE {} SET doc = json_set(doc, {}){}",
                quote(collection),
                setters.join(", "),
                where_sql(filter, &mut params)
            );
            let changed = conn.execute(&sql, params_from_iter(params)).map_err(|e| engine_error(&e))?;
            Ok(QueryResult::affected(changed as u64))
        }
        DocumentStatement::Delete { collection, filter } => {
            if !collection_exists(conn, collection)? {
                return Ok(QueryResult::affected(0));
            }
            let mut params = Vec::new();
            let sql = format!("DELETE FROM {}{}", quote(collection), where_sql(filter, &mut params));
            let deleted = conn.execute(&sql, params_from_iter(params)).map_err(|e| engine_error(&e))?;
            Ok(QueryResult::affected(deleted as u64))
        }
        DocumentStatement::DropCollection { collection } => {
            let existed = collection_exists(conn, collection)?;
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(collection)))
                .map_err(|e| engine_error(&e))?;
            Ok(QueryResult::affected(u64::from(existed)))
        }
        DocumentStatement::Savepoint { action, name } => {
            let verb = match action {
                SavepointAction::Create => "SAVEPOINT",
                SavepointAction::RollbackTo => "ROLLBACK TO",
                SavepointAction::Release => "RELEASE",
            };
            conn.execute_batch(&format!("{verb} {}", quote(name))).map_err(|e| engine_error(&e))?;
            Ok(QueryResult::affected(0))
        }
    }
}

fn parse_document(id: String, doc: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut document = match serde_json::from_str::<serde_json::Value>(doc) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            return Err(AionError::engine_error("document", format!("Document '{id}' is not a JSON object")))
        }
    };
    document.insert(ID_FIELD.to_string(), serde_json::Value::String(id));
    Ok(document)
}

fn select_documents(
    conn: &Connection,
    sql: &str,
    params: Vec<SqlValue>,
    cancel: &CancellationToken,
) -> Result<QueryResult> {
    let mut stmt = conn.prepare(sql).map_err(|e| engine_error(&e))?;
    let mut cursor = stmt.query(params_from_iter(params)).map_err(|e| engine_error(&e))?;

    let mut columns = vec![ID_FIELD.to_string()];
    let mut rows = Vec::new();
    while let Some(row) = cursor.next().map_err(|e| engine_error(&e))? {
        if cancel.is_cancelled() {
            return Ok(QueryResult::cancelled());
        }
        let id: String = row.get(0).map_err(|e| engine_error(&e))?;
        let doc: String = row.get(1).map_err(|e| engine_error(&e))?;
        let document = parse_document(id, &doc)?;

        let mut out = Row::new();
        for (key, value) in &document {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
            out.insert(key.clone(), Value::from_json(value));
        }
        rows.push(out);
    }
    Ok(QueryResult::rows(columns, rows))
}

/// Infer columns from a sample of documents
///
/// Nested objects become dotted paths, conflicting types are reported as
/// `Mixed`, and every field is nullable since documents are schemaless.
pub fn infer_columns(conn: &Connection, collection: &str) -> Result<Vec<ColumnInfo>> {
    let mut columns = vec![ColumnInfo::new(ID_FIELD, "String").primary_key().identity()];
    if !collection_exists(conn, collection)? {
        return Ok(columns);
    }

    let mut stmt = conn
        .prepare(&format!("SELECT {ID_FIELD}, doc FROM {} LIMIT {COLUMN_SAMPLE}", quote(collection)))
        .map_err(|e| engine_error(&e))?;
    let documents = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| engine_error(&e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| engine_error(&e))?;

    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, &'static str> = HashMap::new();
    for (id, doc) in documents {
        let mut document = parse_document(id, &doc)?;
        document.shift_remove(ID_FIELD);
        collect_fields("", &document, &mut order, &mut types);
    }

    columns.extend(order.into_iter().map(|name| {
        let data_type = types.get(&name).copied().unwrap_or("Null");
        ColumnInfo::new(name, data_type)
    }));
    Ok(columns)
}

fn collect_fields(
    prefix: &str,
    document: &serde_json::Map<String, serde_json::Value>,
    order: &mut Vec<String>,
    types: &mut HashMap<String, &'static str>,
) {
    for (key, value) in document {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        if let serde_json::Value::Object(nested) = value {
            if !nested.is_empty() {
                collect_fields(&path, nested, order, types);
                continue;
            }
        }

        let observed = Value::from_json(value).type_name();
        match types.get(&path).copied() {
            None => {
                order.push(path.clone());
                types.insert(path, observed);
            }
            Some("Null") => {
                types.insert(path, observed);
            }
            Some(existing) if existing != observed && observed != "Null" => {
                types.insert(path, "Mixed");
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::document::query::parse_script;
    use pretty_assertions::assert_eq;

    fn run(conn: &Connection, sql: &str) -> QueryResult {
        let statements = parse_script(sql).unwrap();
        execute_script(conn, &statements, &CancellationToken::new()).unwrap()
    }

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("name"), "$.name");
        assert_eq!(json_path("address.city"), "$.address.city");
        assert_eq!(json_path("first name"), "$.\"first name\"");
    }

    #[test]
    fn test_insert_and_select() {
        let conn = memory();
        run(&conn, r#"INSERT INTO people VALUES {"_id": "p1", "name": "Ada", "age": 36}"#);
        run(&conn, r#"INSERT INTO people VALUES {"name": "Linus", "active": true}"#);

        let result = run(&conn, "SELECT $ FROM people WHERE name = 'Ada'");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["_id"], Value::from("p1"));
        assert_eq!(result.rows[0]["age"], Value::Int(36));
        assert_eq!(result.columns[0], "_id");

        let result = run(&conn, "SELECT $ FROM people WHERE active = true");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], Value::from("Linus"));
        assert!(matches!(&result.rows[0]["_id"], Value::Text(id) if id.len() == 36));
    }

    #[test]
    fn test_missing_collection_reads_as_empty() {
        let conn = memory();
        assert!(run(&conn, "SELECT $ FROM nothing").rows.is_empty());
        assert_eq!(run(&conn, "SELECT COUNT(*) FROM nothing").rows[0]["count"], Value::Int(0));
        assert_eq!(run(&conn, "DELETE nothing WHERE a = 1").rows_affected, Some(0));
    }

    #[test]
    fn test_update_sets_nested_paths() {
        let conn = memory();
        run(&conn, r#"INSERT INTO people VALUES {"_id": "p1", "name": "Ada"}"#);
        let result = run(&conn, "UPDATE people SET address.city = 'London', age = 37 WHERE _id = 'p1'");
        assert_eq!(result.rows_affected, Some(1));

        let row = &run(&conn, "SELECT $ FROM people").rows[0];
        assert_eq!(row["age"], Value::Int(37));
        assert_eq!(row["address"], Value::Json(serde_json::json!({"city": "London"})));
        assert_eq!(run(&conn, "SELECT $ FROM people WHERE address.city = 'London'").rows.len(), 1);
    }

    #[test]
    fn test_update_rejects_id() {
        let conn = memory();
        run(&conn, r#"INSERT INTO people VALUES {"_id": "p1"}"#);
        let statements = parse_script("UPDATE people SET _id = 'p2'").unwrap();
        assert!(execute_script(&conn, &statements, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_is_null_filter_matches_missing_fields() {
        let conn = memory();
        run(&conn, r#"INSERT INTO t VALUES {"_id": "a", "x": 1}"#);
        run(&conn, r#"INSERT INTO t VALUES {"_id": "b", "x": null}"#);
        run(&conn, r#"INSERT INTO t VALUES {"_id": "c"}"#);
        assert_eq!(run(&conn, "SELECT COUNT(*) FROM t WHERE x IS NULL").rows[0]["count"], Value::Int(2));
    }

    #[test]
    fn test_delete_and_drop() {
        let conn = memory();
        run(&conn, r#"INSERT INTO t VALUES {"_id": "a"}; INSERT INTO t VALUES {"_id": "b"}"#);
        assert_eq!(run(&conn, "DELETE t WHERE _id = 'a'").rows_affected, Some(1));
        assert_eq!(collections(&conn).unwrap(), vec!["t".to_string()]);
        assert_eq!(run(&conn, "DROP COLLECTION t").rows_affected, Some(1));
        assert!(collections(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_reserved_collection_names() {
        let conn = memory();
        let statements = parse_script(r#"INSERT INTO "$system" VALUES {}"#).unwrap();
        assert!(execute_script(&conn, &statements, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_infer_columns() {
        let conn = memory();
        run(&conn, r#"INSERT INTO t VALUES {"_id": "a", "n": 1, "tag": null, "addr": {"city": "X"}}"#);
        run(&conn, r#"INSERT INTO t VALUES {"_id": "b", "n": "one", "tag": "x", "list": [1]}"#);

        let columns = infer_columns(&conn, "t").unwrap();
        let summary: Vec<(&str, &str)> =
            columns.iter().map(|c| (c.name.as_str(), c.data_type.as_str())).collect();
        assert_eq!(
            summary,
            vec![("_id", "String"), ("n", "Mixed"), ("tag", "String"), ("addr.city", "String"), ("list", "Array")]
        );
        assert!(columns[0].is_primary_key && columns[0].is_identity);
        assert!(columns[1..].iter().all(|c| c.is_nullable));
    }

    #[test]
    fn test_insert_keeps_field_order() {
        let conn = memory();
        run(&conn, r#"INSERT INTO t VALUES {"_id": "a", "first": 1, "second": 2, "third": 3}"#);

        let names: Vec<String> = infer_columns(&conn, "t").unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["_id", "first", "second", "third"]);
    }

    #[test]
    fn test_rollback_to_savepoint_keeps_earlier_writes() {
        let conn = memory();
        conn.execute_batch("BEGIN").unwrap();
        run(&conn, r#"INSERT INTO t VALUES {"_id": "a"}; SAVEPOINT edits"#);
        run(&conn, r#"INSERT INTO t VALUES {"_id": "b"}"#);
        run(&conn, "ROLLBACK TO SAVEPOINT edits; RELEASE SAVEPOINT edits");
        conn.execute_batch("COMMIT").unwrap();

        assert_eq!(run(&conn, "SELECT COUNT(*) FROM t").rows[0]["count"], Value::Int(1));
    }

    #[test]
    fn test_nested_insert_matches_path_filters() {
        use crate::engine::document::DocumentCommands;
        use crate::engine::DatabaseCommands;
        let conn = memory();
        let city = Value::from("Oslo");
        run(&conn, &DocumentCommands.insert("people", &[("addr.city", &city)]));

        assert_eq!(run(&conn, "SELECT $ FROM people WHERE addr.city = 'Oslo'").rows.len(), 1);
        let columns = infer_columns(&conn, "people").unwrap();
        assert_eq!(columns[1].name, "addr.city");
    }

    #[test]
    fn test_cancelled_before_start() {
        let conn = memory();
        let token = CancellationToken::new();
        token.cancel();
        let statements = parse_script("SELECT $ FROM t").unwrap();
        assert!(execute_script(&conn, &statements, &token).unwrap().cancelled);
    }
}
