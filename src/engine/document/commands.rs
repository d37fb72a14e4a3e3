//! Document store script rendering
//!
//! Renders the document command language instead of SQL. Schema-level
//! operations have no equivalent on a schemaless store and render as
//! comment-only scripts, which execute as no-ops.

use base64::Engine;

use crate::engine::commands::{default_literal, quote_string, quote_with, ColumnDefinition, DatabaseCommands, TableModification};
use crate::engine::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentCommands;

impl DatabaseCommands for DocumentCommands {
    fn quote_identifier(&self, name: &str) -> String {
        let bare = !name.is_empty()
            && !name.starts_with('.')
            && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
        if bare {
            name.to_string()
        } else {
            quote_with(name, '"', '"')
        }
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("BINARY('{}')", base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    fn boolean_literal(&self, value: bool) -> String {
        if value { "true" } else { "false" }.to_string()
    }

    fn format_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::DateTime(v) => format!("DATETIME('{}')", v.format("%Y-%m-%d %H:%M:%S")),
            Value::Uuid(v) => format!("GUID('{v}')"),
            Value::Json(v) => v.to_string(),
            Value::Date(_) | Value::Time(_) | Value::DateTimeTz(_) | Value::Decimal(_) => {
                quote_string(&value.to_string())
            }
            other => default_literal(self, other),
        }
    }

    fn create_database(&self, name: &str) -> String {
        format!("-- Document store files are created on first open: {name}")
    }

    fn drop_database(&self, name: &str) -> String {
        format!("-- Delete the store file to drop it: {name}")
    }

    fn backup_database(&self, name: &str) -> String {
        format!("-- Copy the store file to back it up: {name}")
    }

    fn create_table(&self, table: &str, _columns: &[ColumnDefinition]) -> String {
        format!("-- Collections are created on first insert: {}", self.quote_identifier(table))
    }

    fn drop_table(&self, table: &str) -> String {
        format!("DROP COLLECTION {}", self.quote_identifier(table))
    }

    fn alter_table(&self, table: &str, _modification: &TableModification) -> String {
        format!("-- Collections are schemaless, nothing to alter: {}", self.quote_identifier(table))
    }

    /// Dotted fields nest, so `addr.city` lands where `json_extract` reads it
    fn insert(&self, table: &str, values: &[(&str, &Value)]) -> String {
        let mut document = serde_json::Map::new();
        for (field, value) in values {
            place(&mut document, field, value.to_json());
        }
        format!(
            "INSERT INTO {} VALUES {}",
            self.quote_identifier(table),
            serde_json::Value::Object(document)
        )
    }

    fn delete(&self, table: &str, where_clause: &str) -> String {
        format!("DELETE {} WHERE {where_clause}", self.quote_identifier(table))
    }

    fn select_top(&self, table: &str, count: u32) -> String {
        format!("SELECT $ FROM {} LIMIT {count}", self.quote_identifier(table))
    }
}

fn place(document: &mut serde_json::Map<String, serde_json::Value>, path: &str, value: serde_json::Value) {
    match path.split_once('.') {
        Some((head, rest)) if !head.is_empty() && !rest.is_empty() => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !child.is_object() {
                *child = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(child) = child {
                place(child, rest, value);
            }
        }
        _ => {
            document.insert(path.to_string(), value);
        }
    }
}
