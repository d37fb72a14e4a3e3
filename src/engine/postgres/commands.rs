//! `PostgreSQL` script rendering

use crate::engine::commands::{column_lines, hex, quote_with, ColumnDefinition, DatabaseCommands, TableModification};

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresCommands;

impl DatabaseCommands for PostgresCommands {
    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '"', '"')
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex(bytes))
    }

    fn create_database(&self, name: &str) -> String {
        format!("CREATE DATABASE {} WITH ENCODING = 'UTF8'", self.quote_identifier(name))
    }

    fn drop_database(&self, name: &str) -> String {
        format!("DROP DATABASE IF EXISTS {}", self.quote_identifier(name))
    }

    fn backup_database(&self, name: &str) -> String {
        format!(
            "-- PostgreSQL backups are taken with pg_dump from a shell:\n\
             -- pg_dump --format=custom --dbname={name} --file={name}.dump"
        )
    }

    fn create_table(&self, table: &str, columns: &[ColumnDefinition]) -> String {
        let lines = column_lines(self, columns, |c| {
            c.is_identity.then(|| "GENERATED BY DEFAULT AS IDENTITY".to_string())
        });
        format!("CREATE TABLE {} (\n    {}\n)", self.quote_identifier(table), lines.join(",\n    "))
    }

    fn alter_table(&self, table: &str, modification: &TableModification) -> String {
        let table = self.quote_identifier(table);
        match modification {
            TableModification::AddColumn(column) => {
                let mut sql = format!(
                    "ALTER TABLE {table} ADD COLUMN {} {}",
                    self.quote_identifier(&column.name),
                    column.data_type
                );
                if !column.is_nullable {
                    sql.push_str(" NOT NULL");
                }
                if let Some(default) = &column.default_value {
                    sql.push_str(" DEFAULT ");
                    sql.push_str(default);
                }
                sql
            }
            TableModification::DropColumn { name } => {
                format!("ALTER TABLE {table} DROP COLUMN {}", self.quote_identifier(name))
            }
            TableModification::AlterColumn(column) => {
                let name = self.quote_identifier(&column.name);
                let nullability = if column.is_nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                format!(
                    "ALTER TABLE {table} ALTER COLUMN {name} TYPE {}, ALTER COLUMN {name} {nullability}",
                    column.data_type
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_update_statement() {
        let cmd = PostgresCommands;
        let name = Value::from("y");
        let id = Value::Int(1);
        let where_clause = cmd.where_clause(&[("id", &id)]);
        assert_eq!(
            cmd.update("t", &[("name", &name)], &where_clause),
            r#"UPDATE "t" SET "name" = 'y' WHERE "id" = 1"#
        );
    }

    #[test]
    fn test_binary_and_boolean_literals() {
        let cmd = PostgresCommands;
        assert_eq!(cmd.format_literal(&Value::Bytes(vec![0xca, 0xfe])), r"'\xcafe'::bytea");
        assert_eq!(cmd.format_literal(&Value::Bool(true)), "TRUE");
    }

    #[test]
    fn test_create_table_with_identity() {
        let cmd = PostgresCommands;
        let sql = cmd.create_table(
            "users",
            &[
                ColumnDefinition::new("id", "integer").primary_key().identity(),
                ColumnDefinition::new("email", "text").not_null(),
            ],
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"users\" (\n    \"id\" integer GENERATED BY DEFAULT AS IDENTITY NOT NULL,\n    \"email\" text NOT NULL,\n    PRIMARY KEY (\"id\")\n)"
        );
    }

    #[test]
    fn test_alter_column() {
        let cmd = PostgresCommands;
        let sql = cmd.alter_table("t", &TableModification::AlterColumn(ColumnDefinition::new("n", "bigint")));
        assert_eq!(
            sql,
            r#"ALTER TABLE "t" ALTER COLUMN "n" TYPE bigint, ALTER COLUMN "n" DROP NOT NULL"#
        );
    }

    #[test]
    fn test_select_top_and_count() {
        let cmd = PostgresCommands;
        assert_eq!(cmd.select_top("t", 1000), r#"SELECT * FROM "t" LIMIT 1000"#);
        assert_eq!(cmd.count("t"), r#"SELECT COUNT(*) FROM "t""#);
        assert_eq!(cmd.insert("t", &[]), r#"INSERT INTO "t" DEFAULT VALUES"#);
    }

    #[test]
    fn test_backup_is_a_pg_dump_hint() {
        let script = PostgresCommands.backup_database("shop");
        assert!(script.lines().all(|line| line.starts_with("--")));
        assert!(script.contains("pg_dump --format=custom --dbname=shop --file=shop.dump"));
    }

    #[test]
    fn test_savepoints() {
        let cmd = PostgresCommands;
        assert_eq!(cmd.savepoint("edits"), r#"SAVEPOINT "edits""#);
        assert_eq!(cmd.rollback_to_savepoint("edits"), r#"ROLLBACK TO SAVEPOINT "edits""#);
        assert_eq!(cmd.release_savepoint("edits").as_deref(), Some(r#"RELEASE SAVEPOINT "edits""#));
    }
}
