//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Aion.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `ConnectionFailed`: Connection could not be opened or was lost
//! - `QueryFailed`: Backend execution errors
//! - `InvalidInput`: Malformed input or missing required parameters
//! - `EngineError`: Engine-specific database errors
//! - `ConfigError`: Settings file or persistence store errors
//! - `TransactionNotFound`: Operation against an unknown or finished transaction
//! - `EditValidation`: Pending changes that cannot be turned into SQL
//! - `UnsupportedDatabase`: No provider registered for a database type

use thiserror::Error;

/// Main error type for Aion operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AionError {
    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transaction id is not registered (never begun, committed or rolled back)
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Pending changes failed validation before any SQL was executed
    #[error("Edit validation failed: {0}")]
    EditValidation(String),

    /// No provider is available for the requested database type
    #[error("Database type '{0}' is not supported")]
    UnsupportedDatabase(String),
}

impl AionError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::EditValidation(_) => "EDIT_VALIDATION",
            Self::UnsupportedDatabase(_) => "UNSUPPORTED_DATABASE",
        }
    }

    /// Get human-readable error message
    ///
    /// Never contains connection strings or passwords.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether the error means the backend could not be reached
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_))
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a transaction not found error
    pub fn transaction_not_found(transaction_id: impl Into<String>) -> Self {
        Self::TransactionNotFound(transaction_id.into())
    }

    /// Create an edit validation error
    pub fn edit_validation(message: impl Into<String>) -> Self {
        Self::EditValidation(message.into())
    }

    /// Create an unsupported database error
    pub fn unsupported_database(database_type: impl Into<String>) -> Self {
        Self::UnsupportedDatabase(database_type.into())
    }
}

/// Result type alias for Aion operations
pub type Result<T> = std::result::Result<T, AionError>;
