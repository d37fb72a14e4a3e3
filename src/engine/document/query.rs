//! Document command language
//!
//! ```text
//! SELECT $ FROM <collection> [WHERE <filter>] [LIMIT n]
//! SELECT COUNT(*) FROM <collection> [WHERE <filter>]
//! INSERT INTO <collection> VALUES <json object>
//! UPDATE <collection> SET <path> = <literal> [, ...] [WHERE <filter>]
//! DELETE <collection> [WHERE <filter>]
//! DROP COLLECTION <collection>
//! SAVEPOINT <name> | ROLLBACK TO [SAVEPOINT] <name> | RELEASE [SAVEPOINT] <name>
//! ```
//!
//! A filter is `<path> = <literal>` or `<path> IS NULL`, joined by `AND`.
//! Literals are `'text'`, numbers, `true`, `false`, `null`, JSON objects or
//! arrays, `DATETIME('...')`, `BINARY('<base64>')` and `GUID('...')`.
//! Statements are separated by `;` and `--` starts a line comment.

use base64::Engine;
use chrono::NaiveDateTime;

use crate::engine::Value;
use crate::error::{AionError, Result};

/// `path = value`, where a null value means `IS NULL`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavepointAction {
    Create,
    RollbackTo,
    Release,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStatement {
    Select { collection: String, filter: Vec<Predicate>, limit: Option<u64> },
    Count { collection: String, filter: Vec<Predicate> },
    Insert { collection: String, document: serde_json::Map<String, serde_json::Value> },
    Update { collection: String, assignments: Vec<(String, Value)>, filter: Vec<Predicate> },
    Delete { collection: String, filter: Vec<Predicate> },
    DropCollection { collection: String },
    Savepoint { action: SavepointAction, name: String },
}

/// Parse a script into statements; comment-only scripts yield none
pub fn parse_script(input: &str) -> Result<Vec<DocumentStatement>> {
    let mut parser = Parser { input, pos: 0 };
    let mut statements = Vec::new();
    loop {
        parser.skip_trivia();
        while parser.eat_symbol(';') {
            parser.skip_trivia();
        }
        if parser.at_end() {
            return Ok(statements);
        }
        statements.push(parser.statement()?);
        parser.skip_trivia();
        if !parser.at_end() && !parser.eat_symbol(';') {
            return Err(parser.error("expected ';' or end of input"));
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: &str) -> AionError {
        AionError::query_failed(format!("{message} at position {}", self.pos))
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("--") {
                let line_end = trimmed.find('\n').unwrap_or(trimmed.len());
                self.pos += line_end;
            } else {
                return;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        self.skip_trivia();
        if self.peek_char() == Some(symbol) {
            self.pos += symbol.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{symbol}'")))
        }
    }

    /// Bare word made of identifier characters (dots allowed for paths)
    fn word(&mut self) -> Option<&'a str> {
        self.skip_trivia();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '$'))
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    fn peek_keyword(&mut self, keyword: &str) -> bool {
        let start = self.pos;
        let matched = self.word().is_some_and(|w| w.eq_ignore_ascii_case(keyword));
        self.pos = start;
        matched
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let start = self.pos;
        if self.word().is_some_and(|w| w.eq_ignore_ascii_case(keyword)) {
            true
        } else {
            self.pos = start;
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {keyword}")))
        }
    }

    /// Collection name or field path, bare or `"quoted"`
    fn identifier(&mut self) -> Result<String> {
        self.skip_trivia();
        if self.peek_char() == Some('"') {
            return self.quoted('"');
        }
        self.word()
            .filter(|w| !w.starts_with('.'))
            .map(str::to_string)
            .ok_or_else(|| self.error("expected identifier"))
    }

    /// Quoted run with the delimiter doubled inside
    fn quoted(&mut self, delimiter: char) -> Result<String> {
        self.skip_trivia();
        if self.peek_char() != Some(delimiter) {
            return Err(self.error(&format!("expected {delimiter}")));
        }
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == delimiter {
                if chars.peek().map(|(_, n)| *n) == Some(delimiter) {
                    out.push(delimiter);
                    chars.next();
                } else {
                    self.pos += i + 1;
                    return Ok(out);
                }
            } else {
                out.push(c);
            }
        }
        Err(self.error("unterminated quoted text"))
    }

    fn statement(&mut self) -> Result<DocumentStatement> {
        if self.eat_keyword("SELECT") {
            return self.select();
        }
        if self.eat_keyword("INSERT") {
            self.expect_keyword("INTO")?;
            let collection = self.identifier()?;
            self.expect_keyword("VALUES")?;
            let document = match self.json()? {
                serde_json::Value::Object(map) => map,
                _ => return Err(self.error("INSERT expects a JSON object")),
            };
            return Ok(DocumentStatement::Insert { collection, document });
        }
        if self.eat_keyword("UPDATE") {
            let collection = self.identifier()?;
            self.expect_keyword("SET")?;
            let mut assignments = Vec::new();
            loop {
                let path = self.identifier()?;
                self.expect_symbol('=')?;
                assignments.push((path, self.literal()?));
                if !self.eat_symbol(',') {
                    break;
                }
            }
            let filter = self.filter()?;
            return Ok(DocumentStatement::Update { collection, assignments, filter });
        }
        if self.eat_keyword("DELETE") {
            // `DELETE FROM c` is accepted as well as `DELETE c`
            if self.peek_keyword("FROM") {
                let start = self.pos;
                self.eat_keyword("FROM");
                self.skip_trivia();
                if self.at_end() || self.peek_keyword("WHERE") || self.peek_char() == Some(';') {
                    self.pos = start;
                }
            }
            let collection = self.identifier()?;
            let filter = self.filter()?;
            return Ok(DocumentStatement::Delete { collection, filter });
        }
        if self.eat_keyword("DROP") {
            self.expect_keyword("COLLECTION")?;
            return Ok(DocumentStatement::DropCollection { collection: self.identifier()? });
        }
        if self.eat_keyword("SAVEPOINT") {
            return Ok(DocumentStatement::Savepoint { action: SavepointAction::Create, name: self.identifier()? });
        }
        if self.eat_keyword("ROLLBACK") {
            self.expect_keyword("TO")?;
            return self.savepoint_target(SavepointAction::RollbackTo);
        }
        if self.eat_keyword("RELEASE") {
            return self.savepoint_target(SavepointAction::Release);
        }
        Err(self.error("unsupported statement"))
    }

    fn savepoint_target(&mut self, action: SavepointAction) -> Result<DocumentStatement> {
        self.eat_keyword("SAVEPOINT");
        Ok(DocumentStatement::Savepoint { action, name: self.identifier()? })
    }

    fn select(&mut self) -> Result<DocumentStatement> {
        if self.eat_keyword("COUNT") {
            self.expect_symbol('(')?;
            self.expect_symbol('*')?;
            self.expect_symbol(')')?;
            self.expect_keyword("FROM")?;
            let collection = self.identifier()?;
            let filter = self.filter()?;
            return Ok(DocumentStatement::Count { collection, filter });
        }

        if !(self.eat_keyword("$") || self.eat_symbol('*')) {
            return Err(self.error("expected $ or *"));
        }
        self.expect_keyword("FROM")?;
        let collection = self.identifier()?;
        let filter = self.filter()?;
        let limit = if self.eat_keyword("LIMIT") {
            let word = self.word().ok_or_else(|| self.error("expected LIMIT count"))?;
            Some(word.parse::<u64>().map_err(|_| self.error("invalid LIMIT count"))?)
        } else {
            None
        };
        Ok(DocumentStatement::Select { collection, filter, limit })
    }

    fn filter(&mut self) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::new();
        if !self.eat_keyword("WHERE") {
            return Ok(predicates);
        }
        loop {
            let path = self.identifier()?;
            let value = if self.eat_keyword("IS") {
                self.expect_keyword("NULL")?;
                Value::Null
            } else {
                self.expect_symbol('=')?;
                self.literal()?
            };
            predicates.push(Predicate { path, value });
            if !self.eat_keyword("AND") {
                return Ok(predicates);
            }
        }
    }

    fn json(&mut self) -> Result<serde_json::Value> {
        self.skip_trivia();
        let mut stream = serde_json::Deserializer::from_str(self.rest()).into_iter::<serde_json::Value>();
        let value = stream
            .next()
            .ok_or_else(|| self.error("expected JSON value"))?
            .map_err(|e| self.error(&format!("invalid JSON ({e})")))?;
        self.pos += stream.byte_offset();
        Ok(value)
    }

    fn literal(&mut self) -> Result<Value> {
        self.skip_trivia();
        match self.peek_char() {
            Some('\'') => return self.quoted('\'').map(Value::Text),
            Some('{' | '[') => return self.json().map(Value::Json),
            Some(c) if c.is_ascii_digit() || c == '-' => return self.number(),
            _ => {}
        }

        let word = self.word().ok_or_else(|| self.error("expected literal"))?;
        match word.to_ascii_uppercase().as_str() {
            "TRUE" => Ok(Value::Bool(true)),
            "FALSE" => Ok(Value::Bool(false)),
            "NULL" => Ok(Value::Null),
            "DATETIME" => {
                let text = self.call_argument()?;
                NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S"))
                    .map(Value::DateTime)
                    .map_err(|_| self.error("invalid DATETIME literal"))
            }
            "BINARY" => {
                let text = self.call_argument()?;
                base64::engine::general_purpose::STANDARD
                    .decode(text.as_bytes())
                    .map(Value::Bytes)
                    .map_err(|_| self.error("invalid BINARY literal"))
            }
            "GUID" => {
                let text = self.call_argument()?;
                uuid::Uuid::parse_str(&text).map(Value::Uuid).map_err(|_| self.error("invalid GUID literal"))
            }
            _ => Err(self.error(&format!("unexpected '{word}'"))),
        }
    }

    fn call_argument(&mut self) -> Result<String> {
        self.expect_symbol('(')?;
        let text = self.quoted('\'')?;
        self.expect_symbol(')')?;
        Ok(text)
    }

    fn number(&mut self) -> Result<Value> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || *c == 'e' || *c == 'E' || (*c == '-' && *i == 0) || *c == '+'))
            .map_or(rest.len(), |(i, _)| i);
        let text = &rest[..len];
        self.pos += len;
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Value::Int(v));
        }
        text.parse::<f64>().map(Value::Float).map_err(|_| self.error("invalid number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn one(sql: &str) -> DocumentStatement {
        let mut statements = parse_script(sql).unwrap();
        assert_eq!(statements.len(), 1, "{sql}");
        statements.remove(0)
    }

    #[test]
    fn test_select_with_filter_and_limit() {
        assert_eq!(
            one("SELECT $ FROM users WHERE name = 'O''Hara' AND age = 30 LIMIT 10"),
            DocumentStatement::Select {
                collection: "users".into(),
                filter: vec![
                    Predicate { path: "name".into(), value: Value::Text("O'Hara".into()) },
                    Predicate { path: "age".into(), value: Value::Int(30) },
                ],
                limit: Some(10),
            }
        );
    }

    #[test]
    fn test_count() {
        assert_eq!(
            one("select count(*) from users where deleted is null"),
            DocumentStatement::Count {
                collection: "users".into(),
                filter: vec![Predicate { path: "deleted".into(), value: Value::Null }],
            }
        );
    }

    #[test]
    fn test_insert_json_document() {
        let DocumentStatement::Insert { collection, document } =
            one(r#"INSERT INTO users VALUES {"name": "a", "tags": [1, 2]}"#)
        else {
            panic!("expected insert");
        };
        assert_eq!(collection, "users");
        assert_eq!(document["name"], serde_json::json!("a"));
        assert_eq!(document["tags"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_update_with_typed_literals() {
        let DocumentStatement::Update { assignments, filter, .. } = one(
            "UPDATE logs SET at = DATETIME('2024-05-01 10:00:00'), blob = BINARY('AQI='), ok = true \
             WHERE _id = GUID('67e55044-10b1-426f-9247-bb680e5fe0c8')",
        ) else {
            panic!("expected update");
        };
        assert_eq!(assignments.len(), 3);
        assert!(matches!(assignments[0].1, Value::DateTime(_)));
        assert_eq!(assignments[1].1, Value::Bytes(vec![1, 2]));
        assert_eq!(assignments[2].1, Value::Bool(true));
        assert!(matches!(filter[0].value, Value::Uuid(_)));
    }

    #[test]
    fn test_quoted_paths_and_nested_fields() {
        let DocumentStatement::Delete { collection, filter } =
            one(r#"DELETE "my items" WHERE address.city = 'Oslo' AND "odd""name" = -1.5"#)
        else {
            panic!("expected delete");
        };
        assert_eq!(collection, "my items");
        assert_eq!(filter[0].path, "address.city");
        assert_eq!(filter[1].path, "odd\"name");
        assert_eq!(filter[1].value, Value::Float(-1.5));
    }

    #[test]
    fn test_delete_from_form() {
        assert_eq!(
            one("DELETE FROM users WHERE _id = 'x'"),
            DocumentStatement::Delete {
                collection: "users".into(),
                filter: vec![Predicate { path: "_id".into(), value: Value::Text("x".into()) }],
            }
        );
    }

    #[test]
    fn test_comments_and_multiple_statements() {
        let statements = parse_script(
            "-- first\nDROP COLLECTION a;\n-- second\nSELECT $ FROM b;\n",
        )
        .unwrap();
        assert_eq!(statements.len(), 2);
        assert!(parse_script("-- nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn test_savepoint_statements() {
        let savepoints: Vec<DocumentStatement> =
            parse_script("SAVEPOINT a; ROLLBACK TO a; rollback to savepoint a; RELEASE SAVEPOINT a").unwrap();
        let actions: Vec<SavepointAction> = savepoints
            .iter()
            .map(|s| match s {
                DocumentStatement::Savepoint { action, name } if name == "a" => *action,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            actions,
            vec![
                SavepointAction::Create,
                SavepointAction::RollbackTo,
                SavepointAction::RollbackTo,
                SavepointAction::Release,
            ]
        );
        assert!(parse_script("ROLLBACK").is_err());
    }

    #[test]
    fn test_errors() {
        assert!(parse_script("SELECT name FROM users").is_err());
        assert!(parse_script("INSERT INTO users VALUES [1]").is_err());
        assert!(parse_script("UPDATE users SET a = 'unterminated").is_err());
        assert!(parse_script("TRUNCATE users").is_err());
        assert!(parse_script("SELECT $ FROM users LIMIT x").is_err());
    }
}
