//! Shared fixtures for orchestration tests
//!
//! [`ScriptedProvider`] stands in for a live server: it renders SQL with the
//! `PostgreSQL` dialect, answers catalog calls from fixed data, and records
//! every statement it is asked to run. Inside a transaction only writes are
//! recorded, and savepoints are honoured so rolled-back work disappears.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use aion::config::JsonFileStore;
use aion::engine::postgres::PostgresCommands;
use aion::engine::{DatabaseCommands, PlanFormat, PlanType, Row, TransactionRegistry};
use aion::{
    AionError, ColumnInfo, Connection, ConnectionManager, ConnectionSet, DatabaseProvider, DatabaseType, Event,
    EventBus, ProviderRegistry, QueryPlan, QueryResult, Result, TransactionInfo, Value,
};

pub const CONNECTION_STRING: &str = "Host=fake;Username=tester";

pub struct ScriptedProvider {
    commands: PostgresCommands,
    transactions: TransactionRegistry<Vec<String>>,
    reachable: AtomicBool,
    check_delay: Mutex<Duration>,
    checks: Mutex<HashMap<String, (bool, Duration)>>,
    failure: Mutex<Option<(String, String)>>,
    commit_failure: Mutex<Option<String>>,
    executed: Mutex<Vec<String>>,
    committed: Mutex<Vec<Vec<String>>>,
    begun: AtomicUsize,
    rolled_back: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            commands: PostgresCommands,
            transactions: TransactionRegistry::new(),
            reachable: AtomicBool::new(true),
            check_delay: Mutex::new(Duration::ZERO),
            checks: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            commit_failure: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            begun: AtomicUsize::new(0),
            rolled_back: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_check_delay(&self, delay: Duration) {
        *self.check_delay.lock().unwrap() = delay;
    }

    /// Health check outcome for one connection string, overriding the shared flags
    pub fn script_check(&self, connection_string: &str, reachable: bool, delay: Duration) {
        self.checks.lock().unwrap().insert(connection_string.to_string(), (reachable, delay));
    }

    /// Statements containing `trigger` fail with `message`
    pub fn fail_when(&self, trigger: &str, message: &str) {
        *self.failure.lock().unwrap() = Some((trigger.to_string(), message.to_string()));
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// The next commit releases its session and then fails with `message`
    pub fn fail_next_commit(&self, message: &str) {
        *self.commit_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Drop a held-open session behind the orchestrator's back
    pub async fn lose_transaction(&self, transaction_id: &str) {
        self.transactions.take(transaction_id).await.unwrap();
    }

    /// Statements run outside any transaction
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Statement batches of committed transactions, in commit order
    pub fn committed(&self) -> Vec<Vec<String>> {
        self.committed.lock().unwrap().clone()
    }

    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    fn respond(&self, sql: &str) -> QueryResult {
        if let Some((trigger, message)) = self.failure.lock().unwrap().as_ref() {
            if sql.contains(trigger.as_str()) {
                return QueryResult::failed(message.clone());
            }
        }
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            QueryResult::rows(vec!["id".into(), "name".into()], vec![person(1, "Ada"), person(2, "Linus")])
        } else {
            QueryResult::affected(1)
        }
    }
}

fn person(id: i64, name: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Value::Int(id));
    row.insert("name".to_string(), Value::from(name));
    row
}

#[async_trait]
impl DatabaseProvider for ScriptedProvider {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn commands(&self) -> &dyn DatabaseCommands {
        &self.commands
    }

    async fn list_databases(&self, connection_string: &str) -> Result<Option<Vec<String>>> {
        let scripted = self.checks.lock().unwrap().get(connection_string).copied();
        let (reachable, delay) = scripted
            .unwrap_or_else(|| (self.reachable.load(Ordering::SeqCst), *self.check_delay.lock().unwrap()));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !reachable {
            return Ok(None);
        }
        Ok(Some(vec!["main".to_string(), "archive".to_string()]))
    }

    async fn list_tables(&self, _connection_string: &str, _database: &str) -> Result<Vec<String>> {
        Ok(vec!["people".to_string()])
    }

    async fn list_columns(&self, _connection_string: &str, _database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        if table != "people" {
            return Err(AionError::query_failed(format!("relation \"{table}\" does not exist")));
        }
        Ok(vec![ColumnInfo::new("id", "integer").primary_key().identity(), ColumnInfo::new("name", "text")])
    }

    async fn execute_query(&self, _connection_string: &str, sql: &str, cancel: &CancellationToken) -> QueryResult {
        if cancel.is_cancelled() {
            return QueryResult::cancelled();
        }
        self.executed.lock().unwrap().push(sql.to_string());
        self.respond(sql)
    }

    fn rewrite_connection_string(&self, connection_string: &str, database: &str) -> String {
        format!("{connection_string};Database={database}")
    }

    fn default_port(&self) -> Option<u16> {
        Some(5432)
    }

    fn validate_connection_string(&self, connection_string: &str) -> Result<()> {
        if connection_string.is_empty() {
            return Err(AionError::invalid_input("Host is required"));
        }
        Ok(())
    }

    async fn estimated_plan(&self, _connection_string: &str, sql: &str) -> QueryPlan {
        QueryPlan::new(PlanType::Estimated, PlanFormat::Text, format!("Seq Scan ({sql})"))
    }

    async fn actual_plan(&self, _connection_string: &str, sql: &str) -> QueryPlan {
        QueryPlan::new(PlanType::Actual, PlanFormat::Text, format!("Seq Scan (actual) ({sql})"))
    }

    async fn begin_transaction(&self, _connection_string: &str) -> Result<TransactionInfo> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.register(Vec::new()).await)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        let statements = self.transactions.take(transaction_id).await?;
        if let Some(message) = self.commit_failure.lock().unwrap().take() {
            return Err(AionError::query_failed(message));
        }
        self.committed.lock().unwrap().push(statements);
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        self.transactions.take(transaction_id).await?;
        self.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_in_transaction(
        &self,
        transaction_id: &str,
        sql: &str,
        _cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let mut session = self.transactions.acquire(transaction_id).await?;
        let result = self.respond(sql);
        if !result.is_success() || result.rows_affected.is_none() {
            return Ok(result);
        }
        if let Some(savepoint) = sql.strip_prefix("ROLLBACK TO ") {
            let mark = session.iter().rposition(|s| s == savepoint).unwrap();
            session.truncate(mark + 1);
        } else if let Some(savepoint) = sql.strip_prefix("RELEASE ") {
            let mark = session.iter().rposition(|s| s == savepoint).unwrap();
            session.remove(mark);
        } else {
            session.push(sql.to_string());
        }
        Ok(result)
    }
}

/// Orchestrator wired to a [`ScriptedProvider`] and a scratch store
pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub connections: Arc<ConnectionSet>,
    pub providers: Arc<ProviderRegistry>,
    pub events: EventBus,
    pub manager: ConnectionManager,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new());
        let providers = Arc::new(ProviderRegistry::new().with_provider(provider.clone()));
        let connections = Arc::new(ConnectionSet::new());
        let events = EventBus::default();
        let store = Arc::new(JsonFileStore::<Connection>::new(dir.path().join("connections.json")));

        let manager = ConnectionManager::new(Arc::clone(&connections), Arc::clone(&providers), events.clone(), store);
        Self { provider, connections, providers, events, manager, _dir: dir }
    }

    /// Register and connect a connection to the scripted server
    pub async fn connect(&self) -> Uuid {
        let connection = Connection::new("scripted", DatabaseType::Postgres, CONNECTION_STRING);
        self.manager.add_connection(connection).await.unwrap().id
    }
}

/// Every event published since the receiver was created
pub fn drain(receiver: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
