//! Edit Session Engine
//!
//! An [`EditSession`] binds a query result to its source table and tracks
//! uncommitted row edits in an [`EditState`]. [`SqlChangeGenerator`] turns
//! the ledger into dialect SQL for the orchestrator to apply.

use crate::engine::ColumnInfo;

mod change;
mod generator;
mod state;
mod table_name;

pub use change::{ChangeType, PendingChange};
pub use generator::{EditSource, SqlChangeGenerator, SqlGenerationResult};
pub use state::{ChangeCounts, EditState};
pub use table_name::extract_source_table;

#[derive(Debug, Clone)]
pub struct EditSession {
    pub source: EditSource,
    pub state: EditState,
}

impl EditSession {
    pub fn new(table: impl Into<String>, database: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self { source: EditSource::new(table, database, columns), state: EditState::new() }
    }

    #[must_use]
    pub fn primary_keys(&self) -> Vec<&str> {
        self.source.primary_keys()
    }

    /// Whether updates and deletes can be addressed to single rows
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys().is_empty()
    }

    #[must_use]
    pub fn counts(&self) -> ChangeCounts {
        self.state.counts()
    }
}
