//! JSON Output Envelope Types
//!
//! Every CLI command prints exactly one envelope to stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! The `monitor` command is the exception: it streams one event object per
//! line until interrupted.

use serde::{Deserialize, Serialize};

use crate::engine::QueryResult;
use crate::error::AionError;

/// Success envelope for operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database type used for this operation (postgres, mysql, sqlserver, document)
    pub engine: String,

    /// Command that was executed
    pub command: String,

    /// Operation-specific data
    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(engine: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, engine: engine.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Database type (empty string if the failure is not engine-specific)
    pub engine: String,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(engine: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, engine: engine.into(), command: command.into(), error }
    }

    /// Create error envelope from an `AionError`
    pub fn from_error(engine: impl Into<String>, command: impl Into<String>, err: &AionError) -> Self {
        Self::new(engine, command, ErrorInfo::new(err.error_code(), err.message()))
    }

    /// Envelope for a query whose result carries a backend error
    pub fn from_result(engine: impl Into<String>, command: impl Into<String>, result: &QueryResult) -> Option<Self> {
        let message = result.error.as_ref()?;
        Some(Self::new(engine, command, ErrorInfo::new("QUERY_FAILED", message.clone())))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "TRANSACTION_NOT_FOUND", "CONNECTION_FAILED")
    pub code: String,

    /// Human-readable error message (never contains credentials)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (for query results, None for other operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

impl Metadata {
    #[must_use]
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, ..Self::default() }
    }

    #[must_use]
    pub fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned), rows_affected: None }
    }

    /// Metadata describing a finished query
    #[must_use]
    pub fn for_result(result: &QueryResult) -> Self {
        Self {
            execution_ms: result.execution_ms,
            rows_returned: (!result.columns.is_empty()).then(|| result.row_count()),
            rows_affected: result.rows_affected,
        }
    }
}
