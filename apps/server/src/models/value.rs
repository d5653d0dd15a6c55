//! Data types and typed cell values

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    /// Long string. Searched exactly like `String`.
    Text,
    Integer,
    Decimal,
    Date,
    DateTime,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDataTypeError(pub String);

impl fmt::Display for ParseDataTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data type '{}'", self.0)
    }
}

impl std::error::Error for ParseDataTypeError {}

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "text" => Ok(Self::Text),
            "integer" => Ok(Self::Integer),
            "decimal" => Ok(Self::Decimal),
            "date" => Ok(Self::Date),
            "datetime" => Ok(Self::DateTime),
            "boolean" => Ok(Self::Boolean),
            other => Err(ParseDataTypeError(other.to_string())),
        }
    }
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Boolean => "boolean",
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String | Self::Text)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }

    /// Postgres cast applied to text bind parameters of this type.
    pub fn sql_cast(&self) -> &'static str {
        match self {
            Self::String | Self::Text => "text",
            Self::Integer => "bigint",
            Self::Decimal => "numeric",
            Self::Date => "date",
            Self::DateTime => "timestamptz",
            Self::Boolean => "boolean",
        }
    }

    /// Column of `custom_values` holding values of this type.
    pub fn custom_value_column(&self) -> &'static str {
        match self {
            Self::String => "string_value",
            Self::Text => "text_value",
            Self::Integer => "integer_value",
            Self::Decimal => "decimal_value",
            Self::Date => "date_value",
            Self::DateTime => "datetime_value",
            Self::Boolean => "boolean_value",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, non-null cell value. `NULL` is represented as `Option::None` by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Text(String),
}

impl ScalarValue {
    /// Parse a stored (database text) representation for the given type.
    pub fn parse_stored(data_type: DataType, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match data_type {
            DataType::String | DataType::Text => Some(Self::Text(raw.to_string())),
            DataType::Integer => raw.parse().ok().map(Self::Integer),
            DataType::Decimal => Decimal::from_str(raw).ok().map(Self::Decimal),
            DataType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(Self::Date),
            DataType::DateTime => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| Self::DateTime(dt.with_timezone(&Utc))),
            DataType::Boolean => match raw {
                "true" | "t" => Some(Self::Boolean(true)),
                "false" | "f" => Some(Self::Boolean(false)),
                _ => None,
            },
        }
    }

    /// Text form used for bind parameters; matches the `sql_cast` of the value's type.
    pub fn to_bind_text(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => d.to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::DateTime(dt) => dt.to_rfc3339(),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Compare two values of compatible types. Integer and decimal compare numerically,
    /// text compares case-insensitively. Incompatible pairs yield `None`.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Decimal(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Self::Decimal(a), Self::Integer(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S UTC")),
            other => f.write_str(&other.to_bind_text()),
        }
    }
}
