//! Dispatch fields pulled from the agent's `data_collection_results`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

const UNKNOWN: &str = "unknown";

/// Emergency details the voice agent collected during the call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchDetails {
    pub emergency_type: String,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: String,
}

impl DispatchDetails {
    /// Each result is either `{"value": X}` or a bare `X`. Missing or null
    /// values fall back to `"unknown"` and `0.0`.
    pub fn extract(results: &BTreeMap<String, Value>) -> Self {
        Self {
            emergency_type: text_field(results, "emergency_type"),
            location: text_field(results, "location"),
            latitude: number_field(results, "latitude"),
            longitude: number_field(results, "longitude"),
            severity: text_field(results, "severity"),
        }
    }
}

fn field_value<'a>(results: &'a BTreeMap<String, Value>, name: &str) -> Option<&'a Value> {
    let raw = results.get(name)?;
    let value = match raw {
        Value::Object(map) => map.get("value")?,
        other => other,
    };
    (!value.is_null()).then_some(value)
}

fn text_field(results: &BTreeMap<String, Value>, name: &str) -> String {
    match field_value(results, name) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => UNKNOWN.to_string(),
    }
}

fn number_field(results: &BTreeMap<String, Value>, name: &str) -> f64 {
    match field_value(results, name) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
