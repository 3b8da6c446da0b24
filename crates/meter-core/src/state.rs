//! Shadow document state types
//!
//! [`ReportedState`] is the device's last-known actual state (the
//! `state.reported` side of the shadow document). [`DesiredPatch`] is what a
//! source wants changed (written as `state.desired`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields every meter understands
pub const METER: &str = "meter";
pub const RED: &str = "red";
pub const GREEN: &str = "green";
pub const BLUE: &str = "blue";

/// Device-asserted state, read once per cycle and never mutated by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportedState(Map<String, Value>);

impl ReportedState {
    /// Create an empty reported state
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a raw field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Look up a numeric field
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the device reported nothing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builder-style field setter (tests and adapters)
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }
}

impl From<Map<String, Value>> for ReportedState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Partial desired state produced by a source
///
/// Only fields present in the patch are candidates for change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredPatch(Map<String, Value>);

impl DesiredPatch {
    /// Create an empty patch ("no opinion this cycle")
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Set a field in place
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Look up a raw field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Iterate over the patch fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the patch carries no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The fixed all-off patch pushed on shutdown
    pub fn all_off() -> Self {
        Self::new()
            .with(METER, 0.0)
            .with(RED, 0.0)
            .with(GREEN, 0.0)
            .with(BLUE, 0.0)
    }

    /// Whether writing this patch would change anything on the device
    ///
    /// Compared field-wise over the patch's keys only; a field absent from
    /// `reported` counts as a change. Numbers compare by value, so `0` and
    /// `0.0` are equal. An empty patch never differs.
    pub fn differs_from(&self, reported: &ReportedState) -> bool {
        self.0
            .iter()
            .any(|(field, wanted)| match reported.get(field) {
                Some(current) => !values_match(current, wanted),
                None => true,
            })
    }

    /// Render as the shadow update document `{"state": {"desired": ...}}`
    pub fn to_desired_document(&self) -> Value {
        serde_json::json!({ "state": { "desired": self.0 } })
    }
}

impl From<Map<String, Value>> for DesiredPatch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn values_match(current: &Value, wanted: &Value) -> bool {
    match (current, wanted) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => current == wanted,
    }
}

/// Convert a Celsius reading to Fahrenheit
pub fn c_to_f(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}
