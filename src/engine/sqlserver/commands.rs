//! SQL Server script rendering

use crate::engine::commands::{
    column_lines, default_literal, hex, quote_with, ColumnDefinition, DatabaseCommands, TableModification,
};
use crate::engine::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlServerCommands;

impl DatabaseCommands for SqlServerCommands {
    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '[', ']')
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex(bytes))
    }

    fn boolean_literal(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }

    fn format_literal(&self, value: &Value) -> String {
        match value {
            // Unicode literal so NVARCHAR columns round-trip
            Value::Text(text) => format!("N'{}'", text.replace('\'', "''")),
            other => default_literal(self, other),
        }
    }

    fn create_database(&self, name: &str) -> String {
        format!("CREATE DATABASE {} COLLATE SQL_Latin1_General_CP1_CI_AS", self.quote_identifier(name))
    }

    fn drop_database(&self, name: &str) -> String {
        format!(
            "IF DB_ID(N'{}') IS NOT NULL DROP DATABASE {}",
            name.replace('\'', "''"),
            self.quote_identifier(name)
        )
    }

    fn backup_database(&self, name: &str) -> String {
        format!(
            "BACKUP DATABASE {} TO DISK = N'{}.bak' WITH FORMAT, INIT",
            self.quote_identifier(name),
            name.replace('\'', "''")
        )
    }

    fn create_table(&self, table: &str, columns: &[ColumnDefinition]) -> String {
        let lines = column_lines(self, columns, |c| c.is_identity.then(|| "IDENTITY(1,1)".to_string()));
        format!("CREATE TABLE {} (\n    {}\n)", self.quote_identifier(table), lines.join(",\n    "))
    }

    fn drop_table(&self, table: &str) -> String {
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NOT NULL DROP TABLE {}",
            table.replace('\'', "''"),
            self.quote_identifier(table)
        )
    }

    fn alter_table(&self, table: &str, modification: &TableModification) -> String {
        let table = self.quote_identifier(table);
        match modification {
            TableModification::AddColumn(column) => {
                let mut sql = format!(
                    "ALTER TABLE {table} ADD {} {}",
                    self.quote_identifier(&column.name),
                    column.data_type
                );
                sql.push_str(if column.is_nullable { " NULL" } else { " NOT NULL" });
                if let Some(default) = &column.default_value {
                    sql.push_str(" DEFAULT ");
                    sql.push_str(default);
                }
                sql
            }
            TableModification::DropColumn { name } => {
                format!("ALTER TABLE {table} DROP COLUMN {}", self.quote_identifier(name))
            }
            TableModification::AlterColumn(column) => format!(
                "ALTER TABLE {table} ALTER COLUMN {} {}{}",
                self.quote_identifier(&column.name),
                column.data_type,
                if column.is_nullable { " NULL" } else { " NOT NULL" }
            ),
        }
    }

    fn select_top(&self, table: &str, count: u32) -> String {
        format!("SELECT TOP {count} * FROM {}", self.quote_identifier(table))
    }

    fn savepoint(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {name}")
    }

    fn rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {name}")
    }

    fn release_savepoint(&self, _name: &str) -> Option<String> {
        None
    }
}
