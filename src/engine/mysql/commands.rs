//! `MySQL` script rendering

use crate::engine::commands::{column_lines, hex, quote_with, ColumnDefinition, DatabaseCommands, TableModification};
use crate::engine::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlCommands;

impl DatabaseCommands for MySqlCommands {
    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '`', '`')
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex(bytes))
    }

    fn create_database(&self, name: &str) -> String {
        format!(
            "CREATE DATABASE {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            self.quote_identifier(name)
        )
    }

    fn drop_database(&self, name: &str) -> String {
        format!("DROP DATABASE IF EXISTS {}", self.quote_identifier(name))
    }

    fn backup_database(&self, name: &str) -> String {
        format!(
            "-- MySQL backups are taken with mysqldump from a shell:\n\
             -- mysqldump --single-transaction --routines {name} > {name}.sql"
        )
    }

    fn create_table(&self, table: &str, columns: &[ColumnDefinition]) -> String {
        let lines = column_lines(self, columns, |c| c.is_identity.then(|| "AUTO_INCREMENT".to_string()));
        format!(
            "CREATE TABLE {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            self.quote_identifier(table),
            lines.join(",\n    ")
        )
    }

    fn alter_table(&self, table: &str, modification: &TableModification) -> String {
        let table = self.quote_identifier(table);
        let definition = |column: &ColumnDefinition| {
            let mut sql = format!("{} {}", self.quote_identifier(&column.name), column.data_type);
            sql.push_str(if column.is_nullable { " NULL" } else { " NOT NULL" });
            if let Some(default) = &column.default_value {
                sql.push_str(" DEFAULT ");
                sql.push_str(default);
            }
            sql
        };
        match modification {
            TableModification::AddColumn(column) => {
                format!("ALTER TABLE {table} ADD COLUMN {}", definition(column))
            }
            TableModification::DropColumn { name } => {
                format!("ALTER TABLE {table} DROP COLUMN {}", self.quote_identifier(name))
            }
            TableModification::AlterColumn(column) => {
                format!("ALTER TABLE {table} MODIFY COLUMN {}", definition(column))
            }
        }
    }

    fn insert(&self, table: &str, values: &[(&str, &Value)]) -> String {
        let quoted = self.quote_identifier(table);
        if values.is_empty() {
            return format!("INSERT INTO {quoted} () VALUES ()");
        }
        let columns: Vec<String> = values.iter().map(|(c, _)| self.quote_identifier(c)).collect();
        let literals: Vec<String> = values.iter().map(|(_, v)| self.format_literal(v)).collect();
        format!("INSERT INTO {quoted} ({}) VALUES ({})", columns.join(", "), literals.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backtick_quoting() {
        let cmd = MySqlCommands;
        assert_eq!(cmd.quote_identifier("order"), "`order`");
        assert_eq!(cmd.quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_update_and_delete() {
        let cmd = MySqlCommands;
        let name = Value::from("O'Neil");
        let id = Value::Int(9);
        let where_clause = cmd.where_clause(&[("id", &id)]);
        assert_eq!(
            cmd.update("people", &[("name", &name)], &where_clause),
            "UPDATE `people` SET `name` = 'O''Neil' WHERE `id` = 9"
        );
        assert_eq!(cmd.delete("people", &where_clause), "DELETE FROM `people` WHERE `id` = 9");
    }

    #[test]
    fn test_binary_literal() {
        assert_eq!(MySqlCommands.format_literal(&Value::Bytes(vec![1, 255])), "X'01ff'");
    }

    #[test]
    fn test_modify_column() {
        let sql = MySqlCommands.alter_table(
            "t",
            &TableModification::AlterColumn(ColumnDefinition::new("n", "varchar(20)").not_null()),
        );
        assert_eq!(sql, "ALTER TABLE `t` MODIFY COLUMN `n` varchar(20) NOT NULL");
    }

    #[test]
    fn test_default_row_insert() {
        assert_eq!(MySqlCommands.insert("t", &[]), "INSERT INTO `t` () VALUES ()");
    }

    #[test]
    fn test_backup_is_a_mysqldump_hint() {
        let script = MySqlCommands.backup_database("shop");
        assert!(script.lines().all(|line| line.starts_with("--")));
        assert!(script.ends_with("mysqldump --single-transaction --routines shop > shop.sql"));
    }
}
