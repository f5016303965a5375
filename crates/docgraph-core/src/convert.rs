//! Front-matter value conversion into graph property values.
//!
//! A value that cannot be converted to the mapping's declared type yields
//! `None`; callers drop the property for that document and move on.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a node property mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    #[default]
    String,
    Boolean,
    Integer,
    Float,
    Date,
    Datetime,
    StringList,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::StringList => "string_list",
        }
    }
}

/// A value bound as a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    List(Vec<GraphValue>),
    Map(BTreeMap<String, GraphValue>),
}

impl GraphValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Strings held by a list value (non-string elements are skipped).
    pub fn string_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for GraphValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for GraphValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for GraphValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for GraphValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Vec<String>> for GraphValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(GraphValue::String).collect())
    }
}

impl From<Vec<GraphValue>> for GraphValue {
    fn from(value: Vec<GraphValue>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, GraphValue>> for GraphValue {
    fn from(value: BTreeMap<String, GraphValue>) -> Self {
        Self::Map(value)
    }
}

/// Convert a raw front-matter value to the declared property type.
pub fn convert_value(raw: &Value, ty: PropertyType) -> Option<GraphValue> {
    if raw.is_null() {
        return None;
    }
    match ty {
        PropertyType::String => to_string(raw).map(GraphValue::String),
        PropertyType::Boolean => to_bool(raw).map(GraphValue::Boolean),
        PropertyType::Integer => to_integer(raw).map(GraphValue::Integer),
        PropertyType::Float => to_float(raw).map(GraphValue::Float),
        PropertyType::Date => raw.as_str().and_then(parse_date).map(GraphValue::Date),
        PropertyType::Datetime => raw.as_str().and_then(parse_datetime).map(GraphValue::DateTime),
        PropertyType::StringList => to_string_list(raw).map(GraphValue::from),
    }
}

fn to_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn to_float(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

fn to_string_list(raw: &Value) -> Option<Vec<String>> {
    match raw {
        Value::Array(items) => Some(items.iter().filter_map(to_string).collect()),
        Value::String(s) if s.trim().is_empty() => None,
        other => to_string(other).map(|s| vec![s]),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
}

fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    // Zone-less timestamps are taken as UTC.
    const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
}
