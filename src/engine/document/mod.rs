//! Embedded Document Store Provider
//!
//! # Implementation Notes
//! - One file is one database; the database argument of catalog calls is
//!   ignored and the reported name is the file stem
//! - Uses `rusqlite` (synchronous driver); calls run inline on the caller's
//!   task and never hold a connection across an await
//! - Cancellation is checked between statements and rows. Outside a
//!   transaction a cancelled token also interrupts the running `SQLite`
//!   statement; inside one it does not, since an interrupted write rolls
//!   back the whole transaction
//! - The connection string is `Filename=<path>` or a bare path

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::connection_string::{ConnectionString, FILENAME_KEYS};
use crate::engine::{
    ColumnInfo, DatabaseCommands, DatabaseProvider, DatabaseType, PlanFormat, PlanType, QueryPlan,
    QueryResult, TransactionInfo, TransactionRegistry,
};
use crate::error::{AionError, Result};

mod commands;
pub mod query;
mod store;

pub use commands::DocumentCommands;

const PLAN_UNSUPPORTED: &str = "Query plans are not supported by the document store";

/// Document store provider
pub struct DocumentProvider {
    commands: DocumentCommands,
    transactions: TransactionRegistry<Connection>,
}

impl DocumentProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { commands: DocumentCommands, transactions: TransactionRegistry::new() }
    }
}

impl Default for DocumentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseProvider for DocumentProvider {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Document
    }

    fn commands(&self) -> &dyn DatabaseCommands {
        &self.commands
    }

    async fn list_databases(&self, connection_string: &str) -> Result<Option<Vec<String>>> {
        let path = store_path(connection_string)?;
        if let Err(e) = store::open(&path) {
            debug!(error = %e, "Document store could not be opened");
            return Ok(None);
        }
        let name = Path::new(&path)
            .file_stem()
            .map_or_else(|| path.clone(), |stem| stem.to_string_lossy().into_owned());
        Ok(Some(vec![name]))
    }

    async fn list_tables(&self, connection_string: &str, _database: &str) -> Result<Vec<String>> {
        let conn = store::open(&store_path(connection_string)?)?;
        store::collections(&conn)
    }

    async fn list_columns(
        &self,
        connection_string: &str,
        _database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let conn = store::open(&store_path(connection_string)?)?;
        store::infer_columns(&conn, table)
    }

    async fn execute_query(
        &self,
        connection_string: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> QueryResult {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return QueryResult::cancelled();
        }
        let outcome = store_path(connection_string)
            .and_then(|path| store::open(&path))
            .and_then(|conn| run_script(&conn, sql, cancel));
        outcome.unwrap_or_else(|e| QueryResult::failed(e.message())).with_elapsed(started)
    }

    fn rewrite_connection_string(&self, connection_string: &str, _database: &str) -> String {
        connection_string.to_string()
    }

    fn default_port(&self) -> Option<u16> {
        None
    }

    fn validate_connection_string(&self, connection_string: &str) -> Result<()> {
        store_path(connection_string).map(|_| ())
    }

    async fn estimated_plan(&self, _connection_string: &str, _sql: &str) -> QueryPlan {
        QueryPlan::new(PlanType::Estimated, PlanFormat::Text, PLAN_UNSUPPORTED)
    }

    async fn actual_plan(&self, _connection_string: &str, _sql: &str) -> QueryPlan {
        QueryPlan::new(PlanType::Actual, PlanFormat::Text, PLAN_UNSUPPORTED)
    }

    async fn begin_transaction(&self, connection_string: &str) -> Result<TransactionInfo> {
        let conn = store::open(&store_path(connection_string)?)?;
        conn.execute_batch("BEGIN")
            .map_err(|e| AionError::query_failed(format!("Failed to begin transaction: {e}")))?;

        let info = self.transactions.register(conn).await;
        info!(transaction_id = %info.id, "Document store transaction started");
        Ok(info)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        let conn = self.transactions.take(transaction_id).await?;
        conn.execute_batch("COMMIT")
            .map_err(|e| AionError::query_failed(format!("Failed to commit transaction: {e}")))?;
        info!(transaction_id, "Document store transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        let conn = self.transactions.take(transaction_id).await?;
        conn.execute_batch("ROLLBACK")
            .map_err(|e| AionError::query_failed(format!("Failed to roll back transaction: {e}")))?;
        info!(transaction_id, "Document store transaction rolled back");
        Ok(())
    }

    async fn execute_in_transaction(
        &self,
        transaction_id: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let conn = self.transactions.acquire(transaction_id).await?;
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Ok(QueryResult::cancelled());
        }
        let result = query::parse_script(sql)
            .and_then(|statements| store::execute_script(&conn, &statements, cancel))
            .unwrap_or_else(|e| QueryResult::failed(e.message()));
        Ok(result.with_elapsed(started))
    }
}

/// Resolve the store file from `Filename=...` or a bare path
fn store_path(connection_string: &str) -> Result<String> {
    let trimmed = connection_string.trim();
    if !trimmed.is_empty() && !trimmed.contains('=') {
        return Ok(trimmed.to_string());
    }
    ConnectionString::parse(trimmed)?
        .get_non_empty(FILENAME_KEYS)
        .map(str::to_string)
        .ok_or_else(|| AionError::invalid_input("Filename is required"))
}

/// Run outside a transaction, interrupting `SQLite` on cancellation
fn run_script(conn: &Connection, sql: &str, cancel: &CancellationToken) -> Result<QueryResult> {
    let statements = query::parse_script(sql)?;

    let interrupt = conn.get_interrupt_handle();
    let token = cancel.clone();
    let watcher = tokio::spawn(async move {
        token.cancelled().await;
        interrupt.interrupt();
    });

    let outcome = store::execute_script(conn, &statements, cancel);
    watcher.abort();

    match outcome {
        Err(_) if cancel.is_cancelled() => Ok(QueryResult::cancelled()),
        other => other,
    }
}
