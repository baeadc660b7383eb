//! Resource values sent into the policy for write decisions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The policy-relevant subset of a record, keyed by policy input field name.
///
/// Zero values (null, `""`, `0`, `false`, empty collections, the nil UUID)
/// are never stored, so an unset field is indistinguishable from an absent one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceValues(Map<String, Value>);

pub const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// True for values that count as "not set".
pub fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == NIL_UUID,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

impl ResourceValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the value is a zero value. Returns whether it was kept.
    pub fn insert(&mut self, input_field: impl Into<String>, value: Value) -> bool {
        if is_zero_value(&value) {
            return false;
        }
        self.0.insert(input_field.into(), value);
        true
    }

    pub fn get(&self, input_field: &str) -> Option<&Value> {
        self.0.get(input_field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}
