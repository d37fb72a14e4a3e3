//! Dialect-neutral cell values
//!
//! Every provider maps its driver's native values into [`Value`] so that
//! results, pending changes and literal formatting share one type.

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One result row: column name to value
pub type Row = BTreeMap<String, Value>;

/// A single scalar value as returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact numeric kept in its textual form
    Decimal(String),
    Text(String),
    #[serde(serialize_with = "serialize_bytes", deserialize_with = "deserialize_bytes")]
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type label, used for inferred document columns
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) | Self::UInt(_) => "Int64",
            Self::Float(_) => "Double",
            Self::Decimal(_) => "Decimal",
            Self::Text(_) => "String",
            Self::Bytes(_) => "Binary",
            Self::Date(_) | Self::Time(_) | Self::DateTime(_) | Self::DateTimeTz(_) => "DateTime",
            Self::Uuid(_) => "Guid",
            Self::Json(serde_json::Value::Array(_)) => "Array",
            Self::Json(_) => "Document",
        }
    }

    /// Convert to plain JSON (binary as base64, temporal values as ISO strings)
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(v) => Json::Bool(*v),
            Self::Int(v) => Json::from(*v),
            Self::UInt(v) => Json::from(*v),
            // NaN/Infinity have no JSON form
            Self::Float(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Self::Decimal(v) | Self::Text(v) => Json::String(v.clone()),
            Self::Bytes(v) => Json::String(base64::engine::general_purpose::STANDARD.encode(v)),
            Self::Date(v) => Json::String(v.format("%Y-%m-%d").to_string()),
            Self::Time(v) => Json::String(v.format("%H:%M:%S").to_string()),
            Self::DateTime(v) => Json::String(v.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Self::DateTimeTz(v) => Json::String(v.to_rfc3339()),
            Self::Uuid(v) => Json::String(v.to_string()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Convert from plain JSON without guessing at strings
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(v) => Self::Bool(*v),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(Self::UInt))
                .unwrap_or_else(|| Self::Float(n.as_f64().unwrap_or_default())),
            Json::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Text(v) | Self::Decimal(v) => f.write_str(v),
            other => match other.to_json() {
                serde_json::Value::String(s) => f.write_str(&s),
                json => write!(f, "{json}"),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

fn serialize_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn deserialize_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
