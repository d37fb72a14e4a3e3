//! Database Provider Trait and Core Types
//!
//! This module defines the uniform contract every backend implements.
//! Each dialect (`PostgreSQL`, `MySQL`, SQL Server, document store) provides one
//! [`DatabaseProvider`], selected at runtime through the [`ProviderRegistry`].
//!
//! # Stateless Execution
//! Discovery and query methods take a connection string and open, use, and
//! close a session within the call. Transactions are the exception: their
//! session is held open in a [`TransactionRegistry`] owned by the provider.
//!
//! # Engine Isolation
//! Driver code never leaks outside its submodule. Providers return the
//! shared types defined here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod commands;
pub mod connection_string;
pub mod registry;
pub mod transaction;
pub mod value;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

#[cfg(feature = "document")]
pub mod document;

pub use commands::{ColumnDefinition, DatabaseCommands, TableModification};
pub use registry::ProviderRegistry;
pub use transaction::TransactionRegistry;
pub use value::{Row, Value};

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// Microsoft SQL Server
    SqlServer,
    /// Embedded single-file document store
    Document,
}

impl DatabaseType {
    pub const ALL: [Self; 4] = [Self::Postgres, Self::MySQL, Self::SqlServer, Self::Document];

    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SqlServer => "sqlserver",
            Self::Document => "document",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = crate::error::AionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            "document" | "litedb" => Ok(Self::Document),
            other => Err(crate::error::AionError::unsupported_database(other)),
        }
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Backend data type as reported by the catalog
    pub data_type: String,

    pub is_nullable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,

    pub is_primary_key: bool,

    /// Identity / auto-increment column, never written by generated INSERTs
    pub is_identity: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default_value: None,
            max_length: None,
            is_primary_key: false,
            is_identity: false,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    #[must_use]
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }
}

/// Outcome of one execution
///
/// A fresh result replaces the previous one on every run; it is never
/// mutated once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order
    pub columns: Vec<String>,

    pub rows: Vec<Row>,

    /// Rows affected (for INSERT/UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,

    /// Backend error, `None` on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub cancelled: bool,

    /// `false` when the body was deliberately not run (actual plan requests)
    #[serde(default = "default_true")]
    pub executed: bool,

    pub executed_at: DateTime<Utc>,

    /// Execution time in milliseconds
    pub execution_ms: u64,
}

const fn default_true() -> bool {
    true
}

impl QueryResult {
    #[must_use]
    pub fn rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows, ..Self::empty() }
    }

    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self { rows_affected: Some(rows_affected), ..Self::empty() }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Self::empty() }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self { cancelled: true, ..Self::empty() }
    }

    /// Sentinel for an actual-plan request, whose body is never executed
    #[must_use]
    pub fn not_executed() -> Self {
        Self { executed: false, ..Self::empty() }
    }

    fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: None,
            error: None,
            cancelled: false,
            executed: true,
            executed_at: Utc::now(),
            execution_ms: 0,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn with_elapsed(mut self, started: Instant) -> Self {
        self.execution_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanType {
    Estimated,
    Actual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanFormat {
    Text,
    Xml,
    Json,
}

/// Backend-rendered plan, stored verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub plan_type: PlanType,
    pub format: PlanFormat,
    pub content: String,
    pub generated_at: DateTime<Utc>,
}

impl QueryPlan {
    pub fn new(plan_type: PlanType, format: PlanFormat, content: impl Into<String>) -> Self {
        Self { plan_type, format, content: content.into(), generated_at: Utc::now() }
    }

    /// Plan fetch failures are reported inside the plan, never raised
    pub fn from_result(plan_type: PlanType, format: PlanFormat, result: Result<String>) -> Self {
        match result {
            Ok(content) => Self::new(plan_type, format, content),
            Err(e) => Self::new(plan_type, PlanFormat::Text, format!("Error getting plan: {e}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

/// Handle for a held-open transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub status: TransactionStatus,
}

impl TransactionInfo {
    pub fn begin(id: impl Into<String>) -> Self {
        Self { id: id.into(), start_time: Utc::now(), status: TransactionStatus::Active }
    }

    #[must_use]
    pub fn with_status(&self, status: TransactionStatus) -> Self {
        Self { status, ..self.clone() }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }
}

/// Uniform capability contract implemented once per dialect
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Script renderer for this dialect
    fn commands(&self) -> &dyn DatabaseCommands;

    /// `Ok(None)` means the connection could not be opened
    async fn list_databases(&self, connection_string: &str) -> Result<Option<Vec<String>>>;

    async fn list_tables(&self, connection_string: &str, database: &str) -> Result<Vec<String>>;

    async fn list_columns(
        &self,
        connection_string: &str,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>>;

    /// Backend errors land in [`QueryResult::error`]; cancellation sets
    /// [`QueryResult::cancelled`].
    async fn execute_query(
        &self,
        connection_string: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> QueryResult;

    fn rewrite_connection_string(&self, connection_string: &str, database: &str) -> String;

    /// `None` for backends without a network port
    fn default_port(&self) -> Option<u16>;

    fn validate_connection_string(&self, connection_string: &str) -> Result<()>;

    async fn estimated_plan(&self, connection_string: &str, sql: &str) -> QueryPlan;

    async fn actual_plan(&self, connection_string: &str, sql: &str) -> QueryPlan;

    async fn begin_transaction(&self, connection_string: &str) -> Result<TransactionInfo>;

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()>;

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()>;

    /// Fails with `TransactionNotFound` for unknown or finished ids
    async fn execute_in_transaction(
        &self,
        transaction_id: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult>;
}

/// Run an execution future, converting errors and cancellation into results
pub(crate) async fn run_cancellable<F>(cancel: &CancellationToken, execution: F) -> QueryResult
where
    F: Future<Output = Result<QueryResult>>,
{
    let started = Instant::now();
    if cancel.is_cancelled() {
        return QueryResult::cancelled();
    }
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => QueryResult::cancelled(),
        outcome = execution => outcome.unwrap_or_else(|e| QueryResult::failed(e.message())),
    };
    result.with_elapsed(started)
}

/// Run an execution whose session is reused afterwards
///
/// On cancellation `interrupt` asks the server to stop the statement and the
/// execution is then driven to completion, so no unread response is left on
/// the session. A statement that completes anyway reports its own result.
pub(crate) async fn run_to_completion<F, I>(cancel: &CancellationToken, execution: F, interrupt: I) -> QueryResult
where
    F: Future<Output = Result<QueryResult>>,
    I: Future<Output = ()>,
{
    let started = Instant::now();
    if cancel.is_cancelled() {
        return QueryResult::cancelled();
    }
    tokio::pin!(execution);
    let finished = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        outcome = &mut execution => Some(outcome),
    };
    let result = match finished {
        Some(outcome) => outcome.unwrap_or_else(|e| QueryResult::failed(e.message())),
        None => {
            interrupt.await;
            execution.await.unwrap_or_else(|_| QueryResult::cancelled())
        }
    };
    result.with_elapsed(started)
}

/// Statements that cannot run against the database they create
pub(crate) fn is_create_database(sql: &str) -> bool {
    let mut words = sql.split_whitespace();
    matches!(
        (words.next(), words.next()),
        (Some(a), Some(b)) if a.eq_ignore_ascii_case("CREATE") && b.eq_ignore_ascii_case("DATABASE")
    )
}
