//! Optional typed view of string records.
//!
//! The reader always yields strings. Callers that want numbers back can run
//! records through [`auto_parse`] afterwards.

use crate::record::Record;
use serde_json::{Map, Number, Value as JsonValue};

/// Integers and finite floats become JSON numbers; everything else,
/// including the empty string, stays a string.
pub fn auto_parse_value(raw: &str) -> JsonValue {
    if let Ok(n) = raw.parse::<i64>() {
        return JsonValue::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return JsonValue::Number(n);
        }
    }
    JsonValue::String(raw.to_string())
}

pub fn auto_parse(record: &Record) -> JsonValue {
    let map: Map<String, JsonValue> = record
        .iter()
        .map(|(k, v)| (k.to_string(), auto_parse_value(v)))
        .collect();
    JsonValue::Object(map)
}
