// Payload normalization - envelope classification, schema inference, value coercion
use crate::domain::telemetry::{AxisMeta, Row, ValueFormat, ValueType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use serde_json::Value;

/// Keys starting with this prefix carry transport metadata, never data.
pub const META_PREFIX: &str = "__";

/// The outer shape a payload arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A bare array of row objects.
    RawArray(Vec<Row>),
    /// One flat object standing for a single row.
    SingletonObject(Row),
    /// Rows found under an entity key of a wrapping object.
    WrappedArray(Vec<Row>),
    Unrecognized,
}

impl Envelope {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) => {
                let rows = collect_rows(items);
                if rows.is_empty() {
                    Envelope::Unrecognized
                } else {
                    Envelope::RawArray(rows)
                }
            }
            Value::Object(map) => classify_object(map),
            _ => Envelope::Unrecognized,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Envelope::Unrecognized)
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Envelope::RawArray(rows) | Envelope::WrappedArray(rows) => rows,
            Envelope::SingletonObject(row) => vec![row],
            Envelope::Unrecognized => Vec::new(),
        }
    }
}

fn classify_object(map: Row) -> Envelope {
    if map.len() == 1 {
        let inner = map.values().next().cloned().unwrap_or(Value::Null);
        match inner {
            Value::Array(items) if items.iter().all(Value::is_object) => {
                return Envelope::WrappedArray(collect_rows(items));
            }
            Value::Object(inner) => return classify_object(inner),
            _ => {}
        }
    }

    let mut arrays = map.values().filter(|v| is_row_array(v));
    if let (Some(found), None) = (arrays.next(), arrays.next()) {
        if let Value::Array(items) = found {
            return Envelope::WrappedArray(collect_rows(items.clone()));
        }
    }

    if map.values().any(is_scalar) {
        Envelope::SingletonObject(map)
    } else {
        Envelope::Unrecognized
    }
}

fn is_row_array(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
        _ => false,
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn collect_rows(items: Vec<Value>) -> Vec<Row> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// The fixed x/y field assignment of a chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub x_field: String,
    pub y_fields: Vec<String>,
}

/// Infers the schema from one row: the first scalar key is x, the rest are y.
/// Returns `None` when the row has no usable scalar keys.
pub fn detect_keys(row: &Row) -> Option<Schema> {
    let mut keys = row
        .iter()
        .filter(|(key, _)| !key.starts_with(META_PREFIX))
        .filter(|(_, value)| !value.is_array() && !value.is_object())
        .map(|(key, _)| key.clone());

    let x_field = keys.next()?;
    Some(Schema {
        x_field,
        y_fields: keys.collect(),
    })
}

/// Converts a raw x-value into a numeric axis coordinate.
pub fn normalize_x(raw: &Value, meta: Option<&AxisMeta>) -> Option<f64> {
    let Some(meta) = meta else {
        return heuristic_x(raw);
    };

    match (&meta.value_type, &meta.format) {
        (Some(ValueType::Number | ValueType::Integer), Some(ValueFormat::DateTime)) => {
            parse_number(raw).map(|seconds| seconds * 1000.0).filter(|ms| ms.is_finite())
        }
        (Some(ValueType::Number | ValueType::Integer), _) => parse_number(raw),
        (Some(ValueType::String), Some(format)) if format.is_temporal() => {
            raw.as_str().and_then(|s| parse_temporal(s, format))
        }
        (Some(ValueType::String), _) => None,
        _ => heuristic_x(raw),
    }
}

fn heuristic_x(raw: &Value) -> Option<f64> {
    raw.as_str()
        .and_then(parse_date_time)
        .or_else(|| parse_number(raw))
}

/// Converts a raw y-value into a finite number.
pub fn normalize_y(raw: &Value) -> Option<f64> {
    match raw {
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        other => parse_number(other),
    }
}

fn parse_number(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn parse_temporal(raw: &str, format: &ValueFormat) -> Option<f64> {
    match format {
        ValueFormat::Time => parse_time_of_day(raw).or_else(|| parse_date_time(raw)),
        _ => parse_date_time(raw),
    }
}

/// Parses a date or date-time string into epoch milliseconds (UTC when no offset is given).
pub fn parse_date_time(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis() as f64);
    }

    for pattern in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Some(parsed.and_utc().timestamp_millis() as f64);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis() as f64)
}

fn parse_time_of_day(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()?;
    let millis = time.num_seconds_from_midnight() as f64 * 1000.0
        + (time.nanosecond() / 1_000_000) as f64;
    Some(millis)
}

/// Pulls one scalar reading out of a payload for single-value instruments.
///
/// A bare number is used as-is. Otherwise the last row of the payload is
/// consulted: the named field when given, else the first y-field of that
/// row's inferred schema, else its x-field.
pub fn extract_scalar(payload: &Value, field: Option<&str>) -> Option<f64> {
    if let Value::Number(_) | Value::String(_) = payload {
        return normalize_y(payload);
    }

    let rows = Envelope::classify(payload.clone()).into_rows();
    let row = rows.last()?;

    if let Some(field) = field {
        return row.get(field).and_then(normalize_y);
    }

    let schema = detect_keys(row)?;
    let key = schema.y_fields.first().unwrap_or(&schema.x_field);
    row.get(key).and_then(normalize_y)
}
