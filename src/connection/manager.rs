//! Connection Orchestrator
//!
//! Routes every operation on a [`Connection`] or [`Query`] to the provider
//! for its dialect. Query execution never fails outward: backend errors and
//! cancellation come back inside the [`QueryResult`].

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Connection, ConnectionSet, ConnectionState};
use crate::config::EntityStore;
use crate::edit::{extract_source_table, EditSession, SqlChangeGenerator};
use crate::engine::{ColumnInfo, DatabaseProvider, ProviderRegistry, QueryResult, TransactionInfo, TransactionStatus};
use crate::error::{AionError, Result};
use crate::events::{Event, EventBus};
use crate::health::HealthStatus;
use crate::query::Query;

/// Rows loaded by the table editor
const EDITOR_ROW_LIMIT: u32 = 1000;

/// Savepoint wrapping an edit batch applied inside the query's transaction
const APPLY_SAVEPOINT: &str = "aion_apply";

/// Error fragments drivers use for a lost or unreachable server
const CONNECTIVITY_MARKERS: &[&str] = &[
    "connection failed",
    "connection refused",
    "connection reset",
    "connection closed",
    "could not connect",
    "unable to connect",
    "lost connection",
    "server has gone away",
    "broken pipe",
    "timed out",
    "network",
];

fn is_connectivity_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CONNECTIVITY_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub struct ConnectionManager {
    connections: Arc<ConnectionSet>,
    providers: Arc<ProviderRegistry>,
    events: EventBus,
    store: Arc<dyn EntityStore<Connection>>,
}

impl ConnectionManager {
    pub fn new(
        connections: Arc<ConnectionSet>,
        providers: Arc<ProviderRegistry>,
        events: EventBus,
        store: Arc<dyn EntityStore<Connection>>,
    ) -> Self {
        Self { connections, providers, events, store }
    }

    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    #[must_use]
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Load saved connections into the arena; returns how many were added
    pub fn initialize(&self) -> Result<usize> {
        let saved = self.store.load_saved()?;
        let count = saved.len();
        for connection in saved {
            self.connections.insert(connection);
        }
        info!(count, "Loaded saved connections");
        Ok(count)
    }

    fn resolve(&self, connection_id: Uuid) -> Result<(Connection, Arc<dyn DatabaseProvider>)> {
        let connection = self
            .connections
            .get(connection_id)
            .ok_or_else(|| AionError::invalid_input(format!("Unknown connection {connection_id}")))?;
        let provider = self.providers.get(connection.database_type)?;
        Ok((connection, provider))
    }

    fn effective_connection_string(provider: &dyn DatabaseProvider, connection: &Connection, database: &str) -> String {
        if database.is_empty() {
            connection.connection_string.clone()
        } else {
            provider.rewrite_connection_string(&connection.connection_string, database)
        }
    }

    fn set_state(&self, connection_id: Uuid, state: ConnectionState) {
        let changed = self.connections.update(connection_id, |c| {
            let changed = c.state != state;
            c.state = state;
            changed
        });
        if changed == Some(true) {
            self.events.publish(Event::ConnectionStateChanged { connection_id, state });
        }
    }

    /// Flip a connection to failed, keeping health consistent with it
    fn mark_unreachable(&self, connection_id: Uuid, reason: &str) {
        warn!(connection_id = %connection_id, reason, "Connection marked unreachable");
        self.set_state(connection_id, ConnectionState::Failed);
        let previous = self.connections.update(connection_id, |c| {
            let previous = c.health;
            if previous == HealthStatus::Healthy {
                c.health = HealthStatus::Unhealthy;
            }
            previous
        });
        if previous == Some(HealthStatus::Healthy) {
            self.events.publish(Event::ConnectionHealthChanged {
                connection_id,
                new_status: HealthStatus::Unhealthy,
                old_status: HealthStatus::Healthy,
                error_message: Some(reason.to_string()),
            });
        }
    }

    /// Validate, register and connect a new connection
    pub async fn add_connection(&self, connection: Connection) -> Result<Connection> {
        let provider = self.providers.get(connection.database_type)?;
        provider.validate_connection_string(&connection.connection_string)?;

        let id = connection.id;
        if connection.save_credentials {
            self.store.save(&connection)?;
        }
        self.connections.insert(connection);
        self.connect(id).await?;

        self.connections
            .get(id)
            .ok_or_else(|| AionError::invalid_input(format!("Unknown connection {id}")))
    }

    /// Probe a connection, moving it through `Connecting` to `Active` or `Failed`
    pub async fn connect(&self, connection_id: Uuid) -> Result<bool> {
        self.set_state(connection_id, ConnectionState::Connecting);
        self.refresh_databases(connection_id).await
    }

    /// Re-list databases; an unreachable server is reported as `Ok(false)`
    pub async fn refresh_databases(&self, connection_id: Uuid) -> Result<bool> {
        let (connection, provider) = self.resolve(connection_id)?;
        match provider.list_databases(&connection.connection_string).await {
            Ok(Some(names)) => {
                info!(
                    connection_id = %connection_id,
                    database_type = %connection.database_type,
                    databases = names.len(),
                    "Connected"
                );
                self.connections.update(connection_id, |c| c.set_databases(names));
                self.set_state(connection_id, ConnectionState::Active);
                Ok(true)
            }
            Ok(None) => {
                self.mark_unreachable(connection_id, "Failed to retrieve databases");
                Ok(false)
            }
            Err(e) => {
                self.mark_unreachable(connection_id, &e.message());
                Ok(false)
            }
        }
    }

    /// Drop a connection from the arena and the store
    pub fn remove_connection(&self, connection_id: Uuid) -> Result<Option<Connection>> {
        let removed = self.connections.remove(connection_id);
        if let Some(connection) = &removed {
            self.store.delete(connection)?;
            info!(connection_id = %connection_id, "Connection removed");
        }
        Ok(removed)
    }

    /// Table names of a database, fetched once and cached
    pub async fn load_tables(&self, connection_id: Uuid, database: &str) -> Result<Vec<String>> {
        let (connection, provider) = self.resolve(connection_id)?;
        if let Some(entry) = connection.database(database).filter(|d| d.tables_loaded) {
            return Ok(entry.tables.clone());
        }

        let cs = Self::effective_connection_string(provider.as_ref(), &connection, database);
        let tables = provider.list_tables(&cs, database).await?;
        self.connections.update(connection_id, |c| {
            let entry = c.database_mut(database);
            entry.tables = tables.clone();
            entry.tables_loaded = true;
        });
        Ok(tables)
    }

    /// Column metadata of a table, fetched once and cached
    pub async fn load_columns(&self, connection_id: Uuid, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let (connection, provider) = self.resolve(connection_id)?;
        if let Some(columns) = connection.database(database).and_then(|d| d.columns.get(table)) {
            return Ok(columns.clone());
        }

        let cs = Self::effective_connection_string(provider.as_ref(), &connection, database);
        let columns = provider.list_columns(&cs, database, table).await?;
        self.connections.update(connection_id, |c| {
            c.database_mut(database).columns.insert(table.to_string(), columns.clone());
        });
        Ok(columns)
    }

    pub fn invalidate_columns(&self, connection_id: Uuid, database: &str, table: &str) {
        self.connections.update(connection_id, |c| {
            c.database_mut(database).columns.remove(table);
        });
    }

    /// Execute a query, storing and returning its fresh result
    ///
    /// An actual-plan request fetches the plan and skips the body.
    pub async fn execute_query(&self, query: &mut Query, cancel: &CancellationToken) -> QueryResult {
        query.is_executing = true;
        query.started_at = Some(Utc::now());
        query.finished_at = None;
        query.estimated_plan = None;
        query.actual_plan = None;

        // Row indices of pending edits refer to the result being replaced
        if let Some(edit) = query.edit.as_mut() {
            edit.state.discard_all();
        }

        let result = match self.run_query(query, cancel).await {
            Ok(result) => result,
            Err(e) => {
                warn!(query_id = %query.id, error = %e, "Query execution failed");
                QueryResult::failed(e.message())
            }
        };

        if let Some(message) = result.error.as_deref().filter(|m| is_connectivity_message(m)) {
            self.mark_unreachable(query.connection_id, message);
        }

        query.result = Some(result.clone());
        query.is_executing = false;
        query.finished_at = Some(Utc::now());
        self.events.publish(Event::QueryExecuted(Box::new(query.clone())));
        result
    }

    async fn run_query(&self, query: &mut Query, cancel: &CancellationToken) -> Result<QueryResult> {
        let (connection, provider) = self.resolve(query.connection_id)?;
        let cs = Self::effective_connection_string(provider.as_ref(), &connection, &query.database_name);

        if query.use_estimated_plan {
            query.estimated_plan = Some(provider.estimated_plan(&cs, &query.sql).await);
        }
        if query.use_actual_plan {
            query.actual_plan = Some(provider.actual_plan(&cs, &query.sql).await);
            return Ok(QueryResult::not_executed());
        }

        if query.use_transaction && query.active_transaction().is_none() {
            self.begin_transaction(query).await?;
        }

        match query.active_transaction().cloned() {
            Some(transaction) => {
                debug!(transaction_id = %transaction.id, "Executing in transaction");
                let outcome = provider.execute_in_transaction(&transaction.id, &query.sql, cancel).await;
                if matches!(outcome, Err(AionError::TransactionNotFound(_))) {
                    self.end_transaction(query, &transaction, TransactionStatus::RolledBack);
                }
                outcome
            }
            None => Ok(provider.execute_query(&cs, &query.sql, cancel).await),
        }
    }

    /// Begin a transaction for the query; an active one is returned as is
    pub async fn begin_transaction(&self, query: &mut Query) -> Result<TransactionInfo> {
        if let Some(transaction) = query.active_transaction() {
            return Ok(transaction.clone());
        }

        let (connection, provider) = self.resolve(query.connection_id)?;
        let cs = Self::effective_connection_string(provider.as_ref(), &connection, &query.database_name);
        let transaction = provider.begin_transaction(&cs).await?;

        query.transaction = Some(transaction.clone());
        self.events.publish(Event::TransactionStarted {
            connection_id: query.connection_id,
            query_id: query.id,
            transaction: transaction.clone(),
        });
        Ok(transaction)
    }

    pub async fn commit_transaction(&self, query: &mut Query) -> Result<()> {
        self.finish_transaction(query, true).await
    }

    pub async fn rollback_transaction(&self, query: &mut Query) -> Result<()> {
        self.finish_transaction(query, false).await
    }

    async fn finish_transaction(&self, query: &mut Query, commit: bool) -> Result<()> {
        let transaction = match query.active_transaction() {
            Some(transaction) => transaction.clone(),
            None => {
                let id = query.transaction.as_ref().map_or_else(|| "none".to_string(), |t| t.id.clone());
                return Err(AionError::transaction_not_found(id));
            }
        };

        let provider = self.resolve(query.connection_id)?.1;
        let outcome = if commit {
            provider.commit_transaction(&transaction.id).await
        } else {
            provider.rollback_transaction(&transaction.id).await
        };

        // The provider has released the session either way
        let status = match &outcome {
            Ok(()) if commit => TransactionStatus::Committed,
            Ok(()) => TransactionStatus::RolledBack,
            Err(e) => {
                warn!(transaction_id = %transaction.id, error = %e, "Transaction did not finish cleanly");
                TransactionStatus::RolledBack
            }
        };
        self.end_transaction(query, &transaction, status);
        outcome
    }

    fn end_transaction(&self, query: &mut Query, transaction: &TransactionInfo, status: TransactionStatus) {
        let finished = transaction.with_status(status);
        query.transaction = Some(finished.clone());
        self.events.publish(Event::TransactionFinished {
            connection_id: query.connection_id,
            query_id: query.id,
            transaction: finished,
            committed: status == TransactionStatus::Committed,
        });
    }

    /// Build an edit session for a single-table `SELECT`
    pub async fn enable_edit_mode(&self, query: &mut Query) -> Result<()> {
        let (connection, _) = self.resolve(query.connection_id)?;
        let table = extract_source_table(&query.sql, connection.database_type).ok_or_else(|| {
            AionError::edit_validation("Edit mode requires a SELECT from a single table")
        })?;

        let columns = self.load_columns(query.connection_id, &query.database_name, &table).await?;
        let session = EditSession::new(table.clone(), query.database_name.clone(), columns);
        if !session.has_primary_key() {
            warn!(table = %table, "Table has no primary key; only inserts can be applied");
        }
        query.edit = Some(session);
        Ok(())
    }

    /// Query over the first rows of a table, executed and ready for edits
    pub async fn open_table_editor(
        &self,
        connection_id: Uuid,
        database: &str,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<Query> {
        let (_, provider) = self.resolve(connection_id)?;
        let sql = provider.commands().select_top(table, EDITOR_ROW_LIMIT);
        let mut query = Query::new(format!("Edit - {table}"), sql, connection_id, database);

        let columns = self.load_columns(connection_id, database, table).await?;
        let session = EditSession::new(table, database, columns);
        if !session.has_primary_key() {
            warn!(table, "Table has no primary key; only inserts can be applied");
        }
        query.edit = Some(session);

        self.execute_query(&mut query, cancel).await;
        Ok(query)
    }

    /// Apply the query's pending edits; returns the statement count
    ///
    /// Runs inside the query's own active transaction when it has one, under
    /// a savepoint that is rolled back if any statement fails; the transaction
    /// stays open for the caller. Otherwise multi-statement batches get a
    /// fresh transaction that is rolled back on the first failing statement.
    /// On success the ledger is cleared and the query re-executed.
    pub async fn apply_pending_changes(&self, query: &mut Query) -> Result<usize> {
        let edit = query
            .edit
            .as_ref()
            .ok_or_else(|| AionError::edit_validation("Edit mode is not enabled"))?;
        if edit.state.is_empty() {
            return Err(AionError::edit_validation("No changes to apply"));
        }

        let (connection, provider) = self.resolve(query.connection_id)?;
        let generated = SqlChangeGenerator::generate(&edit.source, edit.state.changes(), provider.commands());
        if let Some(message) = generated.validation_error {
            return Err(AionError::edit_validation(message));
        }
        if generated.statements.is_empty() {
            return Err(AionError::edit_validation("No SQL statements generated"));
        }

        let cs = Self::effective_connection_string(provider.as_ref(), &connection, &query.database_name);
        let statements = &generated.statements;
        let own_transaction = query.active_transaction().cloned();

        match own_transaction {
            Some(transaction) => {
                let outcome = run_under_savepoint(provider.as_ref(), &transaction.id, statements).await;
                if matches!(outcome, Err(AionError::TransactionNotFound(_))) {
                    self.end_transaction(query, &transaction, TransactionStatus::RolledBack);
                }
                outcome?;
            }
            None if generated.requires_transaction => {
                let transaction = provider.begin_transaction(&cs).await?;
                if let Err(e) = run_statements(provider.as_ref(), &transaction.id, statements).await {
                    if let Err(rollback) = provider.rollback_transaction(&transaction.id).await {
                        error!(
                            transaction_id = %transaction.id,
                            error = %rollback,
                            "Rollback after failed edit batch also failed"
                        );
                    }
                    return Err(e);
                }
                provider.commit_transaction(&transaction.id).await?;
            }
            None => {
                for sql in statements {
                    let result = provider.execute_query(&cs, sql, &CancellationToken::new()).await;
                    check_statement(&result)?;
                }
            }
        }

        let count = statements.len();
        if let Some(edit) = query.edit.as_mut() {
            edit.state.discard_all();
        }
        info!(query_id = %query.id, statements = count, "Pending changes applied");
        self.events.publish(Event::ChangesApplied { query_id: query.id, statement_count: count });

        self.execute_query(query, &CancellationToken::new()).await;
        Ok(count)
    }
}

fn check_statement(result: &QueryResult) -> Result<()> {
    if let Some(message) = &result.error {
        return Err(AionError::query_failed(message.clone()));
    }
    if result.cancelled {
        return Err(AionError::query_failed("cancelled"));
    }
    Ok(())
}

async fn run_statements(provider: &dyn DatabaseProvider, transaction_id: &str, statements: &[String]) -> Result<()> {
    let cancel = CancellationToken::new();
    for sql in statements {
        let result = provider.execute_in_transaction(transaction_id, sql, &cancel).await?;
        check_statement(&result)?;
    }
    Ok(())
}

/// Run a batch in an open transaction, undoing all of it if one statement fails
async fn run_under_savepoint(
    provider: &dyn DatabaseProvider,
    transaction_id: &str,
    statements: &[String],
) -> Result<()> {
    let commands = provider.commands();
    run_statements(provider, transaction_id, &[commands.savepoint(APPLY_SAVEPOINT)]).await?;

    let outcome = run_statements(provider, transaction_id, statements).await;
    if outcome.is_err() {
        let undo = run_statements(provider, transaction_id, &[commands.rollback_to_savepoint(APPLY_SAVEPOINT)]).await;
        if let Err(e) = undo {
            error!(transaction_id, error = %e, "Rollback to savepoint after failed edit batch also failed");
            return outcome;
        }
    }
    if let Some(release) = commands.release_savepoint(APPLY_SAVEPOINT) {
        let released = run_statements(provider, transaction_id, &[release]).await;
        if outcome.is_ok() {
            released?;
        }
    }
    outcome
}
