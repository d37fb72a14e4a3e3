//! Aion - Multi-Dialect Database Access Engine
//!
//! Aion is the client-side core of a database workbench. It connects to
//! `PostgreSQL`, `MySQL`, SQL Server and an embedded document store through one
//! provider contract, executes queries with cooperative cancellation, holds
//! transactions open across calls, turns grid edits into SQL, and watches
//! connection health in the background.
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`engine`] - Provider contract, shared types, and one module per dialect
//! - [`connection`] - Connection model, shared arena, and orchestrator
//! - [`query`] - Query model
//! - [`edit`] - Pending change ledger and SQL generation
//! - [`health`] - Background health monitor
//! - [`events`] - Publish/subscribe boundary
//! - [`config`] - Settings and persistence stores
//! - [`output`] - JSON output envelopes for the CLI

pub mod config;
pub mod connection;
pub mod edit;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod output;
pub mod query;

// Re-export commonly used types for convenience
pub use connection::{Connection, ConnectionManager, ConnectionSet, ConnectionState};
pub use edit::{EditSession, EditState, PendingChange, SqlChangeGenerator, SqlGenerationResult};
pub use engine::{
    ColumnInfo, DatabaseProvider, DatabaseType, ProviderRegistry, QueryPlan, QueryResult, TransactionInfo,
    TransactionStatus, Value,
};
pub use error::{AionError, Result};
pub use events::{Event, EventBus};
pub use health::{HealthCheckResult, HealthMonitor, HealthSettings, HealthStatus};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use query::Query;
