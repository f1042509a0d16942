// Telemetry data domain models
use serde::{Deserialize, Serialize};
use std::fmt;

/// One flat observation, keys kept in declaration order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A plotted sample. Both coordinates are always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Returns `None` unless both coordinates are finite.
    pub fn new(x: f64, y: f64) -> Option<Self> {
        if x.is_finite() && y.is_finite() {
            Some(Self { x, y })
        } else {
            None
        }
    }
}

/// Declared semantic type of an axis field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueType {
    Number,
    Integer,
    String,
    Other(String),
}

impl From<String> for ValueType {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "number" => ValueType::Number,
            "integer" => ValueType::Integer,
            "string" => ValueType::String,
            _ => ValueType::Other(raw),
        }
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Number => "number".to_string(),
            ValueType::Integer => "integer".to_string(),
            ValueType::String => "string".to_string(),
            ValueType::Other(raw) => raw,
        }
    }
}

/// Declared display format of an axis field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueFormat {
    Date,
    DateTime,
    Time,
    Plain(String),
}

impl ValueFormat {
    pub fn is_temporal(&self) -> bool {
        !matches!(self, ValueFormat::Plain(_))
    }
}

impl From<String> for ValueFormat {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "date" => ValueFormat::Date,
            "date_time" | "datetime" | "date-time" => ValueFormat::DateTime,
            "time" => ValueFormat::Time,
            _ => ValueFormat::Plain(raw),
        }
    }
}

impl From<ValueFormat> for String {
    fn from(value: ValueFormat) -> Self {
        match value {
            ValueFormat::Date => "date".to_string(),
            ValueFormat::DateTime => "date_time".to_string(),
            ValueFormat::Time => "time".to_string(),
            ValueFormat::Plain(raw) => raw,
        }
    }
}

/// Externally supplied hint for converting raw x-values into coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMeta {
    #[serde(rename = "type", default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub format: Option<ValueFormat>,
}

impl AxisMeta {
    pub fn new(value_type: Option<ValueType>, format: Option<ValueFormat>) -> Self {
        Self { value_type, format }
    }
}

/// User-visible state of the widget's data connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "live"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}
