//! Query model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoredEntity;
use crate::edit::EditSession;
use crate::engine::{QueryPlan, QueryResult, TransactionInfo};

/// A SQL text bound to one connection and database
///
/// Queries are owned by their caller and passed by `&mut` into the
/// orchestrator, which replaces `result` on every execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub name: String,
    pub sql: String,
    pub connection_id: Uuid,
    pub database_name: String,

    #[serde(default)]
    pub use_estimated_plan: bool,
    #[serde(default)]
    pub use_actual_plan: bool,
    /// Begin a transaction automatically on the next execution
    #[serde(default)]
    pub use_transaction: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_plan: Option<QueryPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_plan: Option<QueryPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionInfo>,

    #[serde(default)]
    pub is_executing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub edit: Option<EditSession>,
}

impl Query {
    pub fn new(
        name: impl Into<String>,
        sql: impl Into<String>,
        connection_id: Uuid,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sql: sql.into(),
            connection_id,
            database_name: database_name.into(),
            use_estimated_plan: false,
            use_actual_plan: false,
            use_transaction: false,
            result: None,
            estimated_plan: None,
            actual_plan: None,
            transaction: None,
            is_executing: false,
            started_at: None,
            finished_at: None,
            edit: None,
        }
    }

    /// The transaction this query currently runs in, if still active
    #[must_use]
    pub fn active_transaction(&self) -> Option<&TransactionInfo> {
        self.transaction.as_ref().filter(|t| t.is_active())
    }

    #[must_use]
    pub fn is_edit_mode(&self) -> bool {
        self.edit.is_some()
    }

    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.edit.as_ref().is_some_and(|e| !e.state.is_empty())
    }
}

impl StoredEntity for Query {
    fn store_key(&self) -> String {
        self.name.clone()
    }

    fn for_storage(&self) -> Self {
        Self {
            result: None,
            estimated_plan: None,
            actual_plan: None,
            transaction: None,
            is_executing: false,
            started_at: None,
            finished_at: None,
            edit: None,
            ..self.clone()
        }
    }
}
