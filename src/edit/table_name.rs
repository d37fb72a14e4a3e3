//! Single-table detection for editable queries

use regex::Regex;

use crate::engine::DatabaseType;

/// Quoted identifier pattern and its delimiters
const fn quoting(database_type: DatabaseType) -> (&'static str, char, char) {
    match database_type {
        DatabaseType::MySQL => (r"`(?:[^`]|``)+`", '`', '`'),
        DatabaseType::SqlServer => (r"\[(?:[^\]]|\]\])+\]", '[', ']'),
        DatabaseType::Postgres | DatabaseType::Document => (r#""(?:[^"]|"")+""#, '"', '"'),
    }
}

fn unquote(token: &str, open: char, close: char) -> String {
    match token.strip_prefix(open).and_then(|t| t.strip_suffix(close)) {
        Some(inner) => inner.replace(&format!("{close}{close}"), &close.to_string()),
        None => token.to_string(),
    }
}

/// Table a `SELECT` reads from, when it reads from exactly one
///
/// Accepts `FROM name`, `FROM "quoted name"` in the dialect's quoting, and
/// one level of schema qualification. Joins and comma lists yield `None`.
#[must_use]
pub fn extract_source_table(sql: &str, database_type: DatabaseType) -> Option<String> {
    let (quoted, open, close) = quoting(database_type);
    let ident = format!(r"{quoted}|[A-Za-z_][A-Za-z0-9_$#@]*");
    let pattern = format!(
        r"(?is)^\s*SELECT\s.*?\bFROM\s+(?P<first>{ident})(?:\s*\.\s*(?P<second>{ident}))?(?P<rest>.*)$"
    );
    let captures = Regex::new(&pattern).ok()?.captures(sql)?;

    let rest = captures.name("rest").map_or("", |m| m.as_str());
    if rest.trim_start().starts_with(',') {
        return None;
    }
    let joins = Regex::new(r"(?i)\bJOIN\b").ok()?;
    if joins.is_match(rest) {
        return None;
    }

    let table = captures.name("second").or_else(|| captures.name("first"))?;
    Some(unquote(table.as_str(), open, close))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bare_and_quoted_names() {
        assert_eq!(
            extract_source_table("SELECT * FROM users WHERE id = 1", DatabaseType::Postgres),
            Some("users".into())
        );
        assert_eq!(
            extract_source_table(r#"select * from "Order ""Lines""""#, DatabaseType::Postgres),
            Some(r#"Order "Lines""#.into())
        );
        assert_eq!(
            extract_source_table("SELECT * FROM `my table` LIMIT 1000", DatabaseType::MySQL),
            Some("my table".into())
        );
        assert_eq!(
            extract_source_table("SELECT TOP 1000 * FROM [dbo].[Order Details]", DatabaseType::SqlServer),
            Some("Order Details".into())
        );
        assert_eq!(
            extract_source_table("SELECT $ FROM people LIMIT 1000", DatabaseType::Document),
            Some("people".into())
        );
    }

    #[test]
    fn test_multiline_select() {
        let sql = "SELECT id,\n       name\nFROM\n  customers\nORDER BY id";
        assert_eq!(extract_source_table(sql, DatabaseType::MySQL), Some("customers".into()));
    }

    #[test]
    fn test_rejects_non_single_table_queries() {
        assert_eq!(extract_source_table("UPDATE t SET a = 1", DatabaseType::Postgres), None);
        assert_eq!(extract_source_table("SELECT * FROM a, b", DatabaseType::Postgres), None);
        assert_eq!(
            extract_source_table("SELECT * FROM a JOIN b ON a.id = b.id", DatabaseType::Postgres),
            None
        );
        assert_eq!(extract_source_table("SELECT 1", DatabaseType::Postgres), None);
    }
}
