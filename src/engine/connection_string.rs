//! Flat `key=value;key=value` connection strings
//!
//! Keys are matched case-insensitively against alias lists so that the same
//! parser serves every dialect. Unknown keys are preserved in their original
//! order when the string is rendered again.

use std::fmt;

use crate::error::{AionError, Result};

pub const HOST_KEYS: &[&str] = &["host", "server", "data source", "address", "addr"];
pub const PORT_KEYS: &[&str] = &["port"];
pub const USER_KEYS: &[&str] = &["username", "user id", "user", "uid", "user name"];
pub const PASSWORD_KEYS: &[&str] = &["password", "pwd"];
pub const DATABASE_KEYS: &[&str] = &["database", "initial catalog", "db"];
pub const FILENAME_KEYS: &[&str] = &["filename", "file", "data source"];

/// Parsed connection string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pairs: Vec<(String, String)>,
}

impl ConnectionString {
    /// Parse a connection string
    ///
    /// Values may be wrapped in single or double quotes, in which case `;` is
    /// allowed inside and a doubled quote is a literal quote.
    pub fn parse(input: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        let mut chars = input.chars().peekable();

        loop {
            // Key
            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' || c == ';' {
                    break;
                }
                key.push(c);
                chars.next();
            }
            let key = key.trim().to_string();

            match chars.next() {
                Some('=') => {}
                Some(';') | None if key.is_empty() => {
                    if chars.peek().is_none() {
                        break;
                    }
                    continue;
                }
                _ => {
                    return Err(AionError::invalid_input(format!(
                        "Connection string segment '{key}' is missing '='"
                    )))
                }
            }

            if key.is_empty() {
                return Err(AionError::invalid_input("Connection string contains an empty key"));
            }

            // Value
            while chars.peek() == Some(&' ') {
                chars.next();
            }
            let mut value = String::new();
            match chars.peek().copied() {
                Some(quote @ ('"' | '\'')) => {
                    chars.next();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        if c == quote {
                            if chars.peek() == Some(&quote) {
                                value.push(quote);
                                chars.next();
                            } else {
                                closed = true;
                                break;
                            }
                        } else {
                            value.push(c);
                        }
                    }
                    if !closed {
                        return Err(AionError::invalid_input(format!(
                            "Unterminated quoted value for '{key}'"
                        )));
                    }
                    // Skip trailing whitespace up to the separator
                    while let Some(&c) = chars.peek() {
                        if c == ';' {
                            break;
                        }
                        chars.next();
                    }
                }
                _ => {
                    while let Some(&c) = chars.peek() {
                        if c == ';' {
                            break;
                        }
                        value.push(c);
                        chars.next();
                    }
                    value = value.trim().to_string();
                }
            }

            pairs.push((key, value));

            if chars.next().is_none() {
                break;
            }
        }

        Ok(Self { pairs })
    }

    /// First value whose key matches any alias
    #[must_use]
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| aliases.iter().any(|a| k.eq_ignore_ascii_case(a)))
            .map(|(_, v)| v.as_str())
    }

    /// Non-empty value whose key matches any alias
    #[must_use]
    pub fn get_non_empty(&self, aliases: &[&str]) -> Option<&str> {
        self.get(aliases).filter(|v| !v.trim().is_empty())
    }

    /// Set a value, replacing the first alias match in place or appending under `key`
    pub fn set(&mut self, aliases: &[&str], key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| aliases.iter().any(|a| k.eq_ignore_ascii_case(a)))
        {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    /// Remove every key matching an alias
    pub fn remove(&mut self, aliases: &[&str]) {
        self.pairs.retain(|(k, _)| !aliases.iter().any(|a| k.eq_ignore_ascii_case(a)));
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            if value.contains(';') || value.contains('"') || value.starts_with(' ') {
                write!(f, "{key}=\"{}\"", value.replace('"', "\"\""))?;
            } else {
                write!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

/// Swap the database segment of a connection string
///
/// Returns the input unchanged when it cannot be parsed, so the caller sees
/// the driver's own error rather than a rewrite failure.
#[must_use]
pub fn with_database(connection_string: &str, key: &str, database: &str) -> String {
    match ConnectionString::parse(connection_string) {
        Ok(mut parsed) => {
            parsed.set(DATABASE_KEYS, key, database);
            parsed.to_string()
        }
        Err(_) => connection_string.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_basic() {
        let cs = ConnectionString::parse("Host=localhost;Port=5432;Username=admin;Password=s3cret")
            .unwrap();
        assert_eq!(cs.get(HOST_KEYS), Some("localhost"));
        assert_eq!(cs.get(PORT_KEYS), Some("5432"));
        assert_eq!(cs.get(USER_KEYS), Some("admin"));
        assert_eq!(cs.get(PASSWORD_KEYS), Some("s3cret"));
        assert_eq!(cs.get(DATABASE_KEYS), None);
    }

    #[test]
    fn test_keys_are_case_insensitive_with_aliases() {
        let cs = ConnectionString::parse("SERVER=db1;user id=sa;Initial Catalog=shop").unwrap();
        assert_eq!(cs.get(HOST_KEYS), Some("db1"));
        assert_eq!(cs.get(USER_KEYS), Some("sa"));
        assert_eq!(cs.get(DATABASE_KEYS), Some("shop"));
    }

    #[test]
    fn test_quoted_values() {
        let cs = ConnectionString::parse(r#"Host=h;Password="a;b""c";Database='x y'"#).unwrap();
        assert_eq!(cs.get(PASSWORD_KEYS), Some(r#"a;b"c"#));
        assert_eq!(cs.get(DATABASE_KEYS), Some("x y"));
    }

    #[test]
    fn test_trailing_and_repeated_separators() {
        let cs = ConnectionString::parse("Host=h;;Port=1;").unwrap();
        assert_eq!(cs.pairs().len(), 2);
    }

    #[test]
    fn test_missing_equals_is_rejected() {
        let err = ConnectionString::parse("Host=h;garbage").unwrap_err();
        assert!(matches!(err, AionError::InvalidInput(_)));
    }

    #[test]
    fn test_unterminated_quote_is_rejected() {
        assert!(ConnectionString::parse("Password='abc").is_err());
    }

    #[test]
    fn test_with_database_replaces_in_place() {
        let out = with_database("Host=h;Database=old;Port=5432", "Database", "new");
        assert_eq!(out, "Host=h;Database=new;Port=5432");
    }

    #[test]
    fn test_with_database_appends_when_missing() {
        let out = with_database("Server=h;User ID=root", "Database", "shop");
        assert_eq!(out, "Server=h;User ID=root;Database=shop");
    }

    #[test]
    fn test_round_trip_quotes_separators() {
        let mut cs = ConnectionString::parse("Host=h").unwrap();
        cs.set(PASSWORD_KEYS, "Password", "p;w");
        let rendered = cs.to_string();
        assert_eq!(rendered, r#"Host=h;Password="p;w""#);
        assert_eq!(ConnectionString::parse(&rendered).unwrap(), cs);
    }
}
