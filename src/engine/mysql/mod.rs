//! `MySQL` Provider Implementation
//!
//! # Implementation Notes
//! - Uses `mysql_async` with the text protocol, so values arrive as bytes and
//!   are converted using the column type reported by the server
//! - Catalog queries go through `information_schema`, scoped by database name
//! - Connections are explicitly disconnected after stateless calls
//! - A cancelled statement inside a transaction is stopped with `KILL QUERY`
//!   from a side connection and read to its end, keeping the session usable

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, OptsBuilder, Row as MyRow, Value as MyValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::connection_string::{
    with_database, ConnectionString, DATABASE_KEYS, HOST_KEYS, PASSWORD_KEYS, PORT_KEYS, USER_KEYS,
};
use crate::engine::{
    is_create_database, run_cancellable, run_to_completion, ColumnInfo, DatabaseCommands, DatabaseProvider,
    DatabaseType, PlanFormat, PlanType, QueryPlan, QueryResult, Row, TransactionInfo,
    TransactionRegistry, Value,
};
use crate::error::{AionError, Result};

mod commands;

pub use commands::MySqlCommands;

const DEFAULT_PORT: u16 = 3306;
const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];
/// Character set id the server reports for binary strings
const BINARY_CHARSET: u16 = 63;

/// Held-open transaction connection
struct Session {
    conn: Conn,
    /// Where a side connection for `KILL QUERY` is opened
    connection_string: String,
}

/// `MySQL` provider
pub struct MySqlProvider {
    commands: MySqlCommands,
    transactions: TransactionRegistry<Session>,
}

impl MySqlProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { commands: MySqlCommands, transactions: TransactionRegistry::new() }
    }
}

impl Default for MySqlProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseProvider for MySqlProvider {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn commands(&self) -> &dyn DatabaseCommands {
        &self.commands
    }

    async fn list_databases(&self, connection_string: &str) -> Result<Option<Vec<String>>> {
        let mut conn = match connect(connection_string, false).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "MySQL connection could not be opened");
                return Ok(None);
            }
        };

        let names: Vec<String> = conn
            .query("SHOW DATABASES")
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list databases: {e}")))?;
        disconnect(conn).await;

        Ok(Some(
            names
                .into_iter()
                .filter(|name| !SYSTEM_DATABASES.contains(&name.to_ascii_lowercase().as_str()))
                .collect(),
        ))
    }

    async fn list_tables(&self, connection_string: &str, database: &str) -> Result<Vec<String>> {
        let mut conn = connect(&self.rewrite_connection_string(connection_string, database), true).await?;
        let tables: Vec<String> = conn
            .exec(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = ? AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                (database,),
            )
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list tables: {e}")))?;
        disconnect(conn).await;
        Ok(tables)
    }

    async fn list_columns(
        &self,
        connection_string: &str,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let mut conn = connect(&self.rewrite_connection_string(connection_string, database), true).await?;
        let rows: Vec<MyRow> = conn
            .exec(
                "SELECT column_name, column_type, is_nullable, column_default, \
                        character_maximum_length, column_key, extra \
                 FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? \
                 ORDER BY ordinal_position",
                (database, table),
            )
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list columns: {e}")))?;
        disconnect(conn).await;

        Ok(rows
            .iter()
            .map(|row| {
                let text = |idx: usize| row.get::<Option<String>, _>(idx).flatten();
                ColumnInfo {
                    name: text(0).unwrap_or_default(),
                    data_type: text(1).unwrap_or_default(),
                    is_nullable: text(2).is_some_and(|v| v == "YES"),
                    default_value: text(3),
                    max_length: row.get::<Option<i64>, _>(4).flatten(),
                    is_primary_key: text(5).is_some_and(|v| v == "PRI"),
                    is_identity: text(6).is_some_and(|v| v.to_ascii_lowercase().contains("auto_increment")),
                }
            })
            .collect())
    }

    async fn execute_query(
        &self,
        connection_string: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> QueryResult {
        // CREATE DATABASE runs without a default database
        let use_database = !is_create_database(sql);

        let conn = tokio::select! {
            biased;
            () = cancel.cancelled() => return QueryResult::cancelled(),
            conn = connect(connection_string, use_database) => conn,
        };

        match conn {
            Ok(mut conn) => {
                let result = run_cancellable(cancel, execute_sql(&mut conn, sql)).await;
                // A cancelled statement leaves the wire mid-result; drop instead of disconnecting
                if !result.cancelled {
                    disconnect(conn).await;
                }
                result
            }
            Err(e) => QueryResult::failed(e.message()),
        }
    }

    fn rewrite_connection_string(&self, connection_string: &str, database: &str) -> String {
        with_database(connection_string, "Database", database)
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_PORT)
    }

    fn validate_connection_string(&self, connection_string: &str) -> Result<()> {
        let cs = ConnectionString::parse(connection_string)?;
        if cs.get_non_empty(HOST_KEYS).is_none() {
            return Err(AionError::invalid_input("Server is required"));
        }
        if cs.get_non_empty(USER_KEYS).is_none() {
            return Err(AionError::invalid_input("User ID is required"));
        }
        Ok(())
    }

    async fn estimated_plan(&self, connection_string: &str, sql: &str) -> QueryPlan {
        let content = explain(connection_string, &format!("EXPLAIN FORMAT=JSON {sql}")).await;
        QueryPlan::from_result(PlanType::Estimated, PlanFormat::Json, content)
    }

    async fn actual_plan(&self, connection_string: &str, sql: &str) -> QueryPlan {
        let content = explain(connection_string, &format!("EXPLAIN ANALYZE {sql}")).await;
        QueryPlan::from_result(PlanType::Actual, PlanFormat::Text, content)
    }

    async fn begin_transaction(&self, connection_string: &str) -> Result<TransactionInfo> {
        let mut conn = connect(connection_string, true).await?;
        conn.query_drop("START TRANSACTION")
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to begin transaction: {e}")))?;

        let session = Session { conn, connection_string: connection_string.to_string() };
        let info = self.transactions.register(session).await;
        info!(transaction_id = %info.id, "MySQL transaction started");
        Ok(info)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        let Session { mut conn, .. } = self.transactions.take(transaction_id).await?;
        conn.query_drop("COMMIT")
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to commit transaction: {e}")))?;
        disconnect(conn).await;
        info!(transaction_id, "MySQL transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        let Session { mut conn, .. } = self.transactions.take(transaction_id).await?;
        conn.query_drop("ROLLBACK")
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to roll back transaction: {e}")))?;
        disconnect(conn).await;
        info!(transaction_id, "MySQL transaction rolled back");
        Ok(())
    }

    async fn execute_in_transaction(
        &self,
        transaction_id: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let mut session = self.transactions.acquire(transaction_id).await?;
        let Session { conn, connection_string } = &mut *session;
        let thread_id = conn.id();
        let interrupt = kill_query(connection_string, thread_id);
        Ok(run_to_completion(cancel, execute_sql(conn, sql), interrupt).await)
    }
}

/// Stop the statement running on `thread_id`, leaving its transaction open
async fn kill_query(connection_string: &str, thread_id: u32) {
    match connect(connection_string, false).await {
        Ok(mut side) => {
            if let Err(e) = side.query_drop(format!("KILL QUERY {thread_id}")).await {
                debug!(thread_id, error = %e, "MySQL KILL QUERY failed");
            }
            disconnect(side).await;
        }
        Err(e) => debug!(thread_id, error = %e, "MySQL side connection for KILL QUERY failed"),
    }
}

/// Build `mysql_async` options from a flat connection string
fn build_mysql_opts(connection_string: &str, use_database: bool) -> Result<OptsBuilder> {
    let cs = ConnectionString::parse(connection_string)?;

    let host = cs
        .get_non_empty(HOST_KEYS)
        .ok_or_else(|| AionError::invalid_input("MySQL requires 'Server' parameter"))?;

    let user = cs
        .get_non_empty(USER_KEYS)
        .ok_or_else(|| AionError::invalid_input("MySQL requires 'User ID' parameter"))?;

    let port = match cs.get_non_empty(PORT_KEYS) {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| AionError::invalid_input(format!("Invalid port '{port}'")))?,
        None => DEFAULT_PORT,
    };

    let database = if use_database { cs.get_non_empty(DATABASE_KEYS) } else { None };

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(user))
        .pass(cs.get(PASSWORD_KEYS))
        .db_name(database);

    Ok(opts)
}

async fn connect(connection_string: &str, use_database: bool) -> Result<Conn> {
    let opts = build_mysql_opts(connection_string, use_database)?;
    Conn::new(opts)
        .await
        .map_err(|e| AionError::connection_failed(format!("Failed to connect to MySQL: {e}")))
}

async fn disconnect(conn: Conn) {
    if let Err(e) = conn.disconnect().await {
        debug!(error = %e, "MySQL disconnect failed");
    }
}

async fn execute_sql(conn: &mut Conn, sql: &str) -> Result<QueryResult> {
    let mut result = conn
        .query_iter(sql)
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?;

    let columns: Vec<Column> = result.columns_ref().to_vec();
    let affected = result.affected_rows();

    let rows: Vec<MyRow> = result.collect().await.map_err(|e| AionError::query_failed(e.to_string()))?;
    result.drop_result().await.map_err(|e| AionError::query_failed(e.to_string()))?;

    if columns.is_empty() {
        return Ok(QueryResult::affected(affected));
    }

    let names: Vec<String> = columns.iter().map(|c| c.name_str().into_owned()).collect();
    let rows = rows
        .iter()
        .map(|row| {
            names
                .iter()
                .zip(&columns)
                .enumerate()
                .map(|(idx, (name, column))| {
                    let value = row.as_ref(idx).map_or(Value::Null, |v| mysql_value(column, v));
                    (name.clone(), value)
                })
                .collect::<Row>()
        })
        .collect();

    Ok(QueryResult::rows(names, rows))
}

async fn explain(connection_string: &str, statement: &str) -> Result<String> {
    let mut conn = connect(connection_string, true).await?;
    let rows: Vec<MyRow> = conn
        .query(statement)
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?;
    disconnect(conn).await;

    let lines: Vec<String> = rows.iter().filter_map(|row| row.get::<Option<String>, _>(0).flatten()).collect();
    Ok(lines.join("\n"))
}

/// Convert a `MySQL` value into a [`Value`] using the column's declared type
fn mysql_value(column: &Column, value: &MyValue) -> Value {
    match value {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) => Value::Int(*i),
        MyValue::UInt(u) => Value::UInt(*u),
        MyValue::Float(f) => Value::Float(f64::from(*f)),
        MyValue::Double(d) => Value::Float(*d),
        MyValue::Date(year, month, day, hour, minute, second, micro) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));
            let time = date.and_then(|d| {
                d.and_hms_micro_opt(u32::from(*hour), u32::from(*minute), u32::from(*second), *micro)
            });
            match (column.column_type(), date, time) {
                (ColumnType::MYSQL_TYPE_DATE, Some(date), _) => Value::Date(date),
                (_, _, Some(datetime)) => Value::DateTime(datetime),
                // Zero dates ("0000-00-00") have no chrono form
                _ => Value::Text(format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")),
            }
        }
        MyValue::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            let mut text = format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
            if *micros > 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            Value::Text(text)
        }
        MyValue::Bytes(bytes) => text_protocol_value(column, bytes),
    }
}

fn text_protocol_value(column: &Column, bytes: &[u8]) -> Value {
    let binary = column.character_set() == BINARY_CHARSET;
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Value::Bytes(bytes.to_vec());
    };

    let unsigned = column.flags().contains(ColumnFlags::UNSIGNED_FLAG);
    match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            let parsed = if unsigned {
                text.parse::<u64>().ok().map(Value::UInt)
            } else {
                text.parse::<i64>().ok().map(Value::Int)
            };
            parsed.unwrap_or_else(|| Value::Text(text.to_string()))
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text.parse::<f64>().map_or_else(|_| Value::Text(text.to_string()), Value::Float)
        }
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            Value::Decimal(text.to_string())
        }
        ColumnType::MYSQL_TYPE_DATE => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_or_else(|_| Value::Text(text.to_string()), Value::Date),
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .map_or_else(|_| Value::Text(text.to_string()), Value::DateTime)
        }
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(text)
            .map_or_else(|_| Value::Text(text.to_string()), Value::Json),
        ColumnType::MYSQL_TYPE_BIT => Value::Bytes(bytes.to_vec()),
        _ if binary => Value::Bytes(bytes.to_vec()),
        _ => Value::Text(text.to_string()),
    }
}
