//! Shared value types that flow across unit boundaries: trigger payloads
//! published to MQTT/CSV, and the status map each unit reports to the
//! supervisor heartbeat.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A scalar value carried in a trigger payload or a status report.
///
/// Kept to the handful of primitive shapes spec.md's payloads actually use
/// (counts, frequencies, power readings, flags) rather than a fully generic
/// JSON value: payloads are built by hand at each call site, never parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<u32> for ScalarValue {
    fn from(v: u32) -> Self {
        ScalarValue::Int(v as i64)
    }
}

impl From<usize> for ScalarValue {
    fn from(v: usize) -> Self {
        ScalarValue::Int(v as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<f32> for ScalarValue {
    fn from(v: f32) -> Self {
        ScalarValue::Float(v as f64)
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Str(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Str(v.to_string())
    }
}

/// `map<string, scalar>` per spec.md §3 (`TriggerEvent.payload`).
pub type TriggerPayload = BTreeMap<String, ScalarValue>;

/// Builds a [`TriggerPayload`] from `(key, value)` pairs without the
/// boilerplate of a `BTreeMap::new()` + repeated `.insert()`.
#[macro_export]
macro_rules! payload {
    () => {
        $crate::model::TriggerPayload::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::model::TriggerPayload::new();
        $(map.insert($key.to_string(), $crate::model::ScalarValue::from($value));)+
        map
    }};
}

/// `get_status() -> map` per spec.md §4.1.
pub type StatusMap = BTreeMap<String, ScalarValue>;

/// `TriggerEvent` per spec.md §3: immutable once produced, appended to the
/// CSV sink and published to `<host>/batrack/<unit>/<value>` (spec.md §6).
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub wall_time: chrono::DateTime<chrono::Local>,
    pub source_unit: String,
    pub value: bool,
    pub payload: TriggerPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_macro_builds_expected_map() {
        let p = payload! {
            "pings" => 3i64,
            "peak_frequency_hz" => 42000.0f64,
        };
        assert_eq!(p.get("pings"), Some(&ScalarValue::Int(3)));
        assert_eq!(p.get("peak_frequency_hz"), Some(&ScalarValue::Float(42000.0)));
    }

    #[test]
    fn scalar_value_serializes_untagged() {
        let v = ScalarValue::Bool(true);
        assert_eq!(serde_json::to_string(&v).unwrap(), "true");
        let v = ScalarValue::Int(7);
        assert_eq!(serde_json::to_string(&v).unwrap(), "7");
    }
}
