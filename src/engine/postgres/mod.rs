//! `PostgreSQL` Provider Implementation
//!
//! # Implementation Notes
//! - Uses `tokio-postgres`; every call opens its own client and spawns the
//!   connection task, except transactions which keep their client alive
//! - Catalog queries target the `public` schema
//! - Multi-statement scripts fall back to the simple query protocol, whose
//!   values come back as text
//! - Cancellation also sends a server-side cancel request
//! - BYTEA is surfaced as [`Value::Bytes`], NUMERIC as [`Value::Decimal`]

use async_trait::async_trait;
use std::time::Duration;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row as PgRow, SimpleQueryMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::connection_string::{
    with_database, ConnectionString, DATABASE_KEYS, HOST_KEYS, PASSWORD_KEYS, PORT_KEYS, USER_KEYS,
};
use crate::engine::{
    is_create_database, run_cancellable, ColumnInfo, DatabaseCommands, DatabaseProvider,
    DatabaseType, PlanFormat, PlanType, QueryPlan, QueryResult, Row, TransactionInfo,
    TransactionRegistry, Value,
};
use crate::error::{AionError, Result};

mod commands;

pub use commands::PostgresCommands;

const DEFAULT_PORT: u16 = 5432;
const MAINTENANCE_DATABASE: &str = "postgres";

/// `PostgreSQL` provider
pub struct PostgresProvider {
    commands: PostgresCommands,
    transactions: TransactionRegistry<Client>,
}

impl PostgresProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { commands: PostgresCommands, transactions: TransactionRegistry::new() }
    }
}

impl Default for PostgresProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseProvider for PostgresProvider {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn commands(&self) -> &dyn DatabaseCommands {
        &self.commands
    }

    async fn list_databases(&self, connection_string: &str) -> Result<Option<Vec<String>>> {
        let cs = self.rewrite_connection_string(connection_string, MAINTENANCE_DATABASE);
        let client = match connect(&cs).await {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "PostgreSQL connection could not be opened");
                return Ok(None);
            }
        };

        let rows = client
            .query(
                "SELECT datname::text FROM pg_database \
                 WHERE datistemplate = false AND datname <> 'postgres' \
                 ORDER BY datname",
                &[],
            )
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list databases: {e}")))?;

        Ok(Some(rows.iter().map(|row| row.get(0)).collect()))
    }

    async fn list_tables(&self, connection_string: &str, database: &str) -> Result<Vec<String>> {
        let client = connect(&self.rewrite_connection_string(connection_string, database)).await?;
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[],
            )
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list tables: {e}")))?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn list_columns(
        &self,
        connection_string: &str,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let client = connect(&self.rewrite_connection_string(connection_string, database)).await?;
        let query = r"
            SELECT
                c.column_name::text,
                c.data_type::text,
                c.is_nullable::text,
                c.column_default::text,
                c.character_maximum_length::bigint,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                        ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                        AND tc.table_name = kcu.table_name
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                        AND tc.table_schema = c.table_schema
                        AND tc.table_name = c.table_name
                        AND kcu.column_name = c.column_name
                ) AS is_primary_key,
                (c.is_identity = 'YES' OR COALESCE(c.column_default, '') LIKE 'nextval%') AS is_identity
            FROM information_schema.columns c
            WHERE c.table_schema = 'public' AND c.table_name = $1
            ORDER BY c.ordinal_position
        ";

        let rows = client
            .query(query, &[&table])
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list columns: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get(0),
                data_type: row.get(1),
                is_nullable: row.get::<_, String>(2) == "YES",
                default_value: row.get(3),
                max_length: row.get(4),
                is_primary_key: row.get(5),
                is_identity: row.get(6),
            })
            .collect())
    }

    async fn execute_query(
        &self,
        connection_string: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> QueryResult {
        // CREATE DATABASE runs against the maintenance database
        let cs = if is_create_database(sql) {
            self.rewrite_connection_string(connection_string, MAINTENANCE_DATABASE)
        } else {
            connection_string.to_string()
        };

        let client = tokio::select! {
            biased;
            () = cancel.cancelled() => return QueryResult::cancelled(),
            client = connect(&cs) => client,
        };

        match client {
            Ok(client) => run_on_client(&client, sql, cancel).await,
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
            return Err(AionError::invalid_input("Host is required"));
        }
        if cs.get_non_empty(USER_KEYS).is_none() {
            return Err(AionError::invalid_input("Username is required"));
        }
        Ok(())
    }

    async fn estimated_plan(&self, connection_string: &str, sql: &str) -> QueryPlan {
        let content = explain(connection_string, &format!("EXPLAIN {sql}")).await;
        QueryPlan::from_result(PlanType::Estimated, PlanFormat::Text, content)
    }

    async fn actual_plan(&self, connection_string: &str, sql: &str) -> QueryPlan {
        let content = explain(connection_string, &format!("EXPLAIN ANALYZE {sql}")).await;
        QueryPlan::from_result(PlanType::Actual, PlanFormat::Text, content)
    }

    async fn begin_transaction(&self, connection_string: &str) -> Result<TransactionInfo> {
        let client = connect(connection_string).await?;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to begin transaction: {e}")))?;

        let info = self.transactions.register(client).await;
        info!(transaction_id = %info.id, "PostgreSQL transaction started");
        Ok(info)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        let client = self.transactions.take(transaction_id).await?;
        client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to commit transaction: {e}")))?;
        info!(transaction_id, "PostgreSQL transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        let client = self.transactions.take(transaction_id).await?;
        client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to roll back transaction: {e}")))?;
        info!(transaction_id, "PostgreSQL transaction rolled back");
        Ok(())
    }

    async fn execute_in_transaction(
        &self,
        transaction_id: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let client = self.transactions.acquire(transaction_id).await?;
        Ok(run_on_client(&client, sql, cancel).await)
    }
}

/// Build a `tokio-postgres` config from a flat connection string
fn build_pg_config(connection_string: &str) -> Result<Config> {
    let cs = ConnectionString::parse(connection_string)?;

    let host = cs
        .get_non_empty(HOST_KEYS)
        .ok_or_else(|| AionError::invalid_input("PostgreSQL requires 'Host' parameter"))?;

    let user = cs
        .get_non_empty(USER_KEYS)
        .ok_or_else(|| AionError::invalid_input("PostgreSQL requires 'Username' parameter"))?;

    let port = match cs.get_non_empty(PORT_KEYS) {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| AionError::invalid_input(format!("Invalid port '{port}'")))?,
        None => DEFAULT_PORT,
    };

    let mut pg_config = Config::new();
    pg_config
        .host(host)
        .port(port)
        .user(user)
        .dbname(cs.get_non_empty(DATABASE_KEYS).unwrap_or(MAINTENANCE_DATABASE));

    if let Some(password) = cs.get(PASSWORD_KEYS) {
        pg_config.password(password);
    }
    if let Some(timeout) = cs.get_non_empty(&["timeout", "connect timeout"]) {
        if let Ok(seconds) = timeout.parse::<u64>() {
            pg_config.connect_timeout(Duration::from_secs(seconds));
        }
    }

    Ok(pg_config)
}

async fn connect(connection_string: &str) -> Result<Client> {
    let pg_config = build_pg_config(connection_string)?;
    let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
        AionError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
    })?;

    // Note: Connection errors are not logged to prevent credential leakage
    tokio::spawn(async move {
        let _ = connection.await;
    });

    Ok(client)
}

/// Run on an open client, asking the server to abort the statement on cancel
async fn run_on_client(client: &Client, sql: &str, cancel: &CancellationToken) -> QueryResult {
    let cancel_handle = client.cancel_token();
    let result = run_cancellable(cancel, execute_sql(client, sql)).await;
    if result.cancelled {
        if let Err(e) = cancel_handle.cancel_query(NoTls).await {
            debug!(error = %e, "PostgreSQL cancel request failed");
        }
    }
    result
}

async fn execute_sql(client: &Client, sql: &str) -> Result<QueryResult> {
    let stmt = match client.prepare(sql).await {
        Ok(stmt) => stmt,
        Err(e) if is_multi_statement_error(&e) => return execute_script(client, sql).await,
        Err(e) => return Err(AionError::query_failed(db_error_message(&e))),
    };

    if stmt.columns().is_empty() {
        let rows_affected = client
            .execute(&stmt, &[])
            .await
            .map_err(|e| AionError::query_failed(db_error_message(&e)))?;
        return Ok(QueryResult::affected(rows_affected));
    }

    let rows = client
        .query(&stmt, &[])
        .await
        .map_err(|e| AionError::query_failed(db_error_message(&e)))?;

    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
    let rows = rows.iter().map(|row| convert_row(&columns, row)).collect::<Result<Vec<_>>>()?;

    Ok(QueryResult::rows(columns, rows))
}

/// Scripts with several statements go through the simple protocol
async fn execute_script(client: &Client, sql: &str) -> Result<QueryResult> {
    let messages = client
        .simple_query(sql)
        .await
        .map_err(|e| AionError::query_failed(db_error_message(&e)))?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Row> = Vec::new();
    let mut affected = 0_u64;

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(description) => {
                // Keep only the last result set
                columns = description.iter().map(|c| c.name().to_string()).collect();
                rows.clear();
            }
            SimpleQueryMessage::Row(row) => {
                let values = (0..row.len()).map(|idx| {
                    row.get(idx).map_or(Value::Null, |text| Value::Text(text.to_string()))
                });
                rows.push(columns.iter().cloned().zip(values).collect());
            }
            SimpleQueryMessage::CommandComplete(count) => affected += count,
            _ => {}
        }
    }

    if columns.is_empty() {
        Ok(QueryResult::affected(affected))
    } else {
        Ok(QueryResult::rows(columns, rows))
    }
}

async fn explain(connection_string: &str, statement: &str) -> Result<String> {
    let client = connect(connection_string).await?;
    let messages = client
        .simple_query(statement)
        .await
        .map_err(|e| AionError::query_failed(db_error_message(&e)))?;

    let lines: Vec<String> = messages
        .iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
            _ => None,
        })
        .collect();
    Ok(lines.join("\n"))
}

fn is_multi_statement_error(e: &tokio_postgres::Error) -> bool {
    e.as_db_error().is_some_and(|db| db.message().contains("multiple commands"))
}

/// Prefer the server's message over the driver's generic "db error"
fn db_error_message(e: &tokio_postgres::Error) -> String {
    e.as_db_error().map_or_else(|| e.to_string(), |db| db.message().to_string())
}

fn convert_row(columns: &[String], row: &PgRow) -> Result<Row> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, name)| postgres_value(row, idx).map(|value| (name.clone(), value)))
        .collect()
}

fn read<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize, f: impl FnOnce(T) -> Value) -> Result<Value> {
    row.try_get::<_, Option<T>>(idx)
        .map(|value| value.map_or(Value::Null, f))
        .map_err(|e| AionError::query_failed(format!("Failed to read column {idx}: {e}")))
}

/// Convert a `PostgreSQL` value into a [`Value`]
fn postgres_value(row: &PgRow, idx: usize) -> Result<Value> {
    let col_type = row.columns()[idx].type_().clone();

    match col_type {
        Type::BOOL => read(row, idx, Value::Bool),
        Type::CHAR => read::<i8>(row, idx, |v| Value::Int(i64::from(v))),
        Type::INT2 => read::<i16>(row, idx, |v| Value::Int(i64::from(v))),
        Type::INT4 => read::<i32>(row, idx, |v| Value::Int(i64::from(v))),
        Type::INT8 => read(row, idx, Value::Int),
        Type::OID => read::<u32>(row, idx, |v| Value::UInt(u64::from(v))),
        Type::FLOAT4 => read::<f32>(row, idx, |v| Value::Float(f64::from(v))),
        Type::FLOAT8 => read(row, idx, Value::Float),
        Type::NUMERIC => {
            read::<rust_decimal::Decimal>(row, idx, |v| Value::Decimal(v.to_string()))
        }
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            read(row, idx, Value::Text)
        }
        Type::JSON | Type::JSONB => read(row, idx, Value::Json),
        Type::BYTEA => read(row, idx, Value::Bytes),
        Type::TIMESTAMP => read(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => read(row, idx, Value::DateTimeTz),
        Type::DATE => read(row, idx, Value::Date),
        Type::TIME => read(row, idx, Value::Time),
        Type::UUID => read(row, idx, Value::Uuid),
        _ => Ok(row
            .try_get::<_, Option<String>>(idx)
            .map_or_else(
                |_| Value::Text(format!("<{}>", col_type.name())),
                |value| value.map_or(Value::Null, Value::Text),
            )),
    }
}
