use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// One uncommitted row edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: Uuid,
    pub change_type: ChangeType,
    /// Index into the edited result; inserts use indices past its end
    pub row_index: usize,
    /// Snapshot of the row as loaded (empty for inserts)
    pub original_values: Row,
    /// Edited columns only (empty for deletes)
    pub new_values: Row,
    pub created_at: DateTime<Utc>,
}

impl PendingChange {
    pub(crate) fn new(change_type: ChangeType, row_index: usize, original_values: Row, new_values: Row) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_type,
            row_index,
            original_values,
            new_values,
            created_at: Utc::now(),
        }
    }

    /// Original value of a column, `Null` when absent from the snapshot
    #[must_use]
    pub fn original(&self, column: &str) -> &Value {
        self.original_values.get(column).unwrap_or(&Value::Null)
    }

    /// Columns whose new value differs from the snapshot
    #[must_use]
    pub fn modified_columns(&self) -> Vec<&str> {
        self.new_values
            .iter()
            .filter(|(column, value)| self.change_type == ChangeType::Insert || self.original(column) != *value)
            .map(|(column, _)| column.as_str())
            .collect()
    }

    /// Update whose edits all match the snapshot again
    pub(crate) fn is_reverted(&self) -> bool {
        self.change_type == ChangeType::Update && self.modified_columns().is_empty()
    }
}
