use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A declarative chart document (data, mark, channel encodings).
///
/// Holds an arbitrary JSON tree; conformance is decided by schema validation,
/// not by this type. The empty object stands for "no chart".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartSpec(Value);

impl ChartSpec {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The empty specification `{}`.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// True for `{}`, `null`, or any non-object value.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Object(map) => map.is_empty(),
            _ => true,
        }
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Mark type, whether written as `"bar"` or `{"type": "bar"}`.
    pub fn mark(&self) -> Option<&str> {
        match self.0.get("mark")? {
            Value::String(s) => Some(s),
            Value::Object(obj) => obj.get("type").and_then(|t| t.as_str()),
            _ => None,
        }
    }

    /// Field names referenced by the encoding channels, deduplicated.
    pub fn encoded_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        let Some(encoding) = self.0.get("encoding").and_then(|e| e.as_object()) else {
            return fields;
        };

        for channel in encoding.values() {
            // Channels such as `tooltip` may carry an array of field definitions.
            let defs: Vec<&Value> = match channel {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for def in defs {
                if let Some(field) = def.get("field").and_then(|f| f.as_str()) {
                    if !fields.iter().any(|f| f == field) {
                        fields.push(field.to_string());
                    }
                }
            }
        }

        fields
    }
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ChartSpec {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Output of one chart-generation call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartResult {
    pub description: String,
    pub specification: ChartSpec,
    pub valid: bool,
}

impl ChartResult {
    /// A validated chart.
    pub fn valid(description: impl Into<String>, specification: ChartSpec) -> Self {
        Self {
            description: description.into(),
            specification,
            valid: true,
        }
    }

    /// A degraded result: explanatory text and an empty specification.
    pub fn degraded(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            specification: ChartSpec::empty(),
            valid: false,
        }
    }
}
