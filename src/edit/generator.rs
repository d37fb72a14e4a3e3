//! Pending changes to SQL
//!
//! Statements are rendered through the provider's [`DatabaseCommands`], so
//! quoting and literal syntax follow the target dialect. WHERE clauses are
//! always built from the *original* key values, so editing a key column
//! never detaches the statement from the row it came from.

use serde::Serialize;

use super::change::{ChangeType, PendingChange};
use crate::engine::{ColumnInfo, DatabaseCommands, Value};

/// Table a set of edits applies to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditSource {
    pub table: Option<String>,
    pub database: Option<String>,
    pub columns: Vec<ColumnInfo>,
}

impl EditSource {
    pub fn new(table: impl Into<String>, database: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self { table: Some(table.into()), database: Some(database.into()), columns }
    }

    #[must_use]
    pub fn primary_keys(&self) -> Vec<&str> {
        self.columns.iter().filter(|c| c.is_primary_key).map(|c| c.name.as_str()).collect()
    }

    fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn is_key_or_identity(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| c.is_primary_key || c.is_identity)
    }

    fn is_identity(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| c.is_identity)
    }

    /// Metadata order first, then columns unknown to the metadata by name
    fn ordered<'a>(&self, values: impl Iterator<Item = (&'a String, &'a Value)>) -> Vec<(&'a str, &'a Value)> {
        let mut pairs: Vec<(&str, &Value)> = values.map(|(c, v)| (c.as_str(), v)).collect();
        let rank = |name: &str| self.columns.iter().position(|c| c.name == name).unwrap_or(usize::MAX);
        pairs.sort_by(|a, b| rank(a.0).cmp(&rank(b.0)).then_with(|| a.0.cmp(b.0)));
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SqlGenerationResult {
    pub statements: Vec<String>,
    /// More than one statement, so application must be atomic
    pub requires_transaction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

impl SqlGenerationResult {
    fn invalid(message: impl Into<String>) -> Self {
        Self { validation_error: Some(message.into()), ..Self::default() }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_error.is_none()
    }
}

pub struct SqlChangeGenerator;

impl SqlChangeGenerator {
    pub fn generate(
        source: &EditSource,
        changes: &[PendingChange],
        commands: &dyn DatabaseCommands,
    ) -> SqlGenerationResult {
        if changes.is_empty() {
            return SqlGenerationResult::default();
        }

        let Some(table) = source.table.as_deref().filter(|t| !t.is_empty()) else {
            return SqlGenerationResult::invalid("Source table is not specified");
        };
        if source.database.as_deref().map_or(true, str::is_empty) {
            return SqlGenerationResult::invalid("Source database is not specified");
        }

        let keys = source.primary_keys();
        let needs_keys = changes.iter().any(|c| c.change_type != ChangeType::Insert);
        if needs_keys && keys.is_empty() {
            return SqlGenerationResult::invalid("Cannot generate UPDATE/DELETE statements without primary key columns");
        }

        let mut statements = Vec::new();
        let mut errors = Vec::new();
        for change in changes {
            let statement = match change.change_type {
                ChangeType::Insert => insert(source, table, change, commands),
                ChangeType::Update => {
                    key_filter(&keys, change, commands).map(|filter| update(source, table, change, &filter, commands))
                }
                ChangeType::Delete => {
                    key_filter(&keys, change, commands).map(|filter| Some(commands.delete(table, &filter)))
                }
            };
            match statement {
                Ok(Some(sql)) => statements.push(sql),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            return SqlGenerationResult::invalid(errors.join("; "));
        }
        SqlGenerationResult { requires_transaction: statements.len() > 1, statements, validation_error: None }
    }
}

fn insert(
    source: &EditSource,
    table: &str,
    change: &PendingChange,
    commands: &dyn DatabaseCommands,
) -> Result<Option<String>, String> {
    let values: Vec<(&str, &Value)> = source
        .ordered(change.new_values.iter())
        .into_iter()
        .filter(|(column, _)| !source.is_identity(column))
        .collect();
    if values.is_empty() {
        return Err(format!("Row {}: no values to insert", change.row_index));
    }
    Ok(Some(commands.insert(table, &values)))
}

fn update(
    source: &EditSource,
    table: &str,
    change: &PendingChange,
    filter: &str,
    commands: &dyn DatabaseCommands,
) -> Option<String> {
    let values: Vec<(&str, &Value)> = source
        .ordered(change.new_values.iter())
        .into_iter()
        .filter(|(column, value)| !source.is_key_or_identity(column) && change.original(column) != *value)
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(commands.update(table, &values, filter))
}

/// WHERE clause from the snapshot's key values
fn key_filter(keys: &[&str], change: &PendingChange, commands: &dyn DatabaseCommands) -> Result<String, String> {
    let mut pairs = Vec::with_capacity(keys.len());
    for key in keys {
        let value = change.original_values.get(*key).ok_or_else(|| {
            format!("Row {}: missing original value for primary key column '{key}'", change.row_index)
        })?;
        pairs.push((*key, value));
    }
    Ok(commands.where_clause(&pairs))
}
