//! Script rendering sub-contract
//!
//! Each provider exposes a [`DatabaseCommands`] implementation that renders
//! DDL/DML as text in its own dialect. Rendered text is consumed by the edit
//! engine and by scripting helpers; providers never execute it themselves.

use serde::{Deserialize, Serialize};

use crate::engine::value::Value;

/// Column shape used by `CREATE TABLE` / `ALTER TABLE` scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_identity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_primary_key: false,
            is_identity: false,
            default_value: None,
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

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }
}

/// A single `ALTER TABLE` operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableModification {
    AddColumn(ColumnDefinition),
    DropColumn { name: String },
    AlterColumn(ColumnDefinition),
}

/// Dialect-specific SQL text rendering
pub trait DatabaseCommands: Send + Sync {
    /// Quote an identifier, escaping the dialect's closing quote
    fn quote_identifier(&self, name: &str) -> String;

    /// Render binary data as a literal
    fn binary_literal(&self, bytes: &[u8]) -> String;

    /// Render a boolean literal
    fn boolean_literal(&self, value: bool) -> String {
        if value { "TRUE" } else { "FALSE" }.to_string()
    }

    /// Render a value as a SQL literal
    ///
    /// Strings are quoted with `'` doubled, numerics are left bare, dates are
    /// `'YYYY-MM-DD HH:MM:SS'`, and everything else is quoted as a string.
    fn format_literal(&self, value: &Value) -> String {
        default_literal(self, value)
    }

    /// Render `col = literal AND ...`, with `IS NULL` for nulls
    fn where_clause(&self, key_values: &[(&str, &Value)]) -> String {
        key_values
            .iter()
            .map(|(column, value)| {
                let column = self.quote_identifier(column);
                if value.is_null() {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} = {}", self.format_literal(value))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn create_database(&self, name: &str) -> String;

    fn drop_database(&self, name: &str) -> String;

    fn backup_database(&self, name: &str) -> String;

    fn create_table(&self, table: &str, columns: &[ColumnDefinition]) -> String;

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }

    fn alter_table(&self, table: &str, modification: &TableModification) -> String;

    /// `INSERT` for the given column/value pairs; no pairs means a default row
    fn insert(&self, table: &str, values: &[(&str, &Value)]) -> String {
        let table = self.quote_identifier(table);
        if values.is_empty() {
            return format!("INSERT INTO {table} DEFAULT VALUES");
        }
        let columns: Vec<String> = values.iter().map(|(c, _)| self.quote_identifier(c)).collect();
        let literals: Vec<String> = values.iter().map(|(_, v)| self.format_literal(v)).collect();
        format!("INSERT INTO {table} ({}) VALUES ({})", columns.join(", "), literals.join(", "))
    }

    fn update(&self, table: &str, values: &[(&str, &Value)], where_clause: &str) -> String {
        let assignments: Vec<String> = values
            .iter()
            .map(|(c, v)| format!("{} = {}", self.quote_identifier(c), self.format_literal(v)))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {where_clause}",
            self.quote_identifier(table),
            assignments.join(", ")
        )
    }

    fn delete(&self, table: &str, where_clause: &str) -> String {
        format!("DELETE FROM {} WHERE {where_clause}", self.quote_identifier(table))
    }

    fn select_top(&self, table: &str, count: u32) -> String {
        format!("SELECT * FROM {} LIMIT {count}", self.quote_identifier(table))
    }

    fn count(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.quote_identifier(table))
    }

    fn savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {}", self.quote_identifier(name))
    }

    fn rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", self.quote_identifier(name))
    }

    /// `None` where savepoints only end with their transaction
    fn release_savepoint(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {}", self.quote_identifier(name)))
    }
}

/// Shared literal rendering behind [`DatabaseCommands::format_literal`]
pub fn default_literal<C: DatabaseCommands + ?Sized>(commands: &C, value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => commands.boolean_literal(*v),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) if v.is_finite() => v.to_string(),
        Value::Decimal(v) => v.clone(),
        Value::Bytes(v) => commands.binary_literal(v),
        Value::DateTime(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S")),
        Value::DateTimeTz(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S")),
        Value::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
        Value::Json(v) => quote_string(&v.to_string()),
        other => quote_string(&other.to_string()),
    }
}

/// Quote a string literal, doubling embedded single quotes
#[must_use]
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote with a symmetric delimiter, doubling it inside the name
#[must_use]
pub fn quote_with(name: &str, open: char, close: char) -> String {
    let escaped = name.replace(close, &format!("{close}{close}"));
    format!("{open}{escaped}{close}")
}

/// Lowercase hex, used by the binary literal forms
#[must_use]
pub fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Render a column list for `CREATE TABLE`, with a trailing PK constraint
pub(crate) fn column_lines<C: DatabaseCommands + ?Sized>(
    commands: &C,
    columns: &[ColumnDefinition],
    identity_suffix: impl Fn(&ColumnDefinition) -> Option<String>,
) -> Vec<String> {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut line = format!("{} {}", commands.quote_identifier(&column.name), column.data_type);
            if let Some(suffix) = identity_suffix(column) {
                line.push(' ');
                line.push_str(&suffix);
            }
            if !column.is_nullable {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default_value {
                line.push_str(" DEFAULT ");
                line.push_str(default);
            }
            line
        })
        .collect();

    let keys: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| commands.quote_identifier(&c.name))
        .collect();
    if !keys.is_empty() {
        lines.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    lines
}
