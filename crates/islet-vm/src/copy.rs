//! Deep copies of script values.
//!
//! A [`CopiedValue`] is a self-contained, isolate-independent representation
//! of a JSON-like value. It is the form in which data crosses an isolate
//! boundary by value: captured under the source isolate's lock, materialized
//! under the destination's.
//!
//! Functions, promises and embedder objects cannot be copied; buffers are
//! copied byte for byte; error objects keep name, message and stack.

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::object::{ObjectData, PropertyKey};
use crate::value::{ErrorValue, Value};

/// A deep, self-contained copy of a script value.
#[derive(Debug, Clone, PartialEq)]
pub enum CopiedValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<CopiedValue>),
    Object(Vec<(String, CopiedValue)>),
    Buffer(Vec<u8>),
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
}

impl CopiedValue {
    /// Captures a deep copy of `value`. Must run on the thread that owns the
    /// value's isolate.
    pub fn capture(value: &Value) -> Result<Self> {
        let mut in_flight = FxHashSet::default();
        Self::capture_inner(value, &mut in_flight)
    }

    fn capture_inner(value: &Value, in_flight: &mut FxHashSet<usize>) -> Result<Self> {
        match value {
            Value::Undefined => Ok(Self::Undefined),
            Value::Null => Ok(Self::Null),
            Value::Boolean(b) => Ok(Self::Boolean(*b)),
            Value::Number(n) => Ok(Self::Number(*n)),
            Value::String(s) => Ok(Self::String(s.to_string())),
            Value::Buffer(b) => Ok(Self::Buffer(b.as_ref().clone())),
            Value::Error(e) => Ok(Self::Error {
                name: e.name.clone(),
                message: e.message.clone(),
                stack: e.stack.clone(),
            }),
            Value::Array(arr) => {
                let token = std::sync::Arc::as_ptr(arr) as usize;
                if !in_flight.insert(token) {
                    return Err(Error::internal("Circular structure cannot be copied"));
                }
                let elements = arr
                    .to_vec()
                    .iter()
                    .map(|v| Self::capture_inner(v, in_flight))
                    .collect::<Result<Vec<_>>>();
                in_flight.remove(&token);
                Ok(Self::Array(elements?))
            }
            Value::Object(obj) => {
                let token = std::sync::Arc::as_ptr(obj) as usize;
                if !in_flight.insert(token) {
                    return Err(Error::internal("Circular structure cannot be copied"));
                }
                let mut entries = Vec::with_capacity(obj.len());
                let result = (|| {
                    for (key, v) in obj.entries() {
                        entries.push((key.to_string(), Self::capture_inner(&v, in_flight)?));
                    }
                    Ok(())
                })();
                in_flight.remove(&token);
                result.map(|()| Self::Object(entries))
            }
            Value::Function(_) => Err(Error::internal("#<Function> could not be copied")),
            Value::Promise(_) => Err(Error::internal("#<Promise> could not be copied")),
            Value::Host(_) => Err(Error::internal("#<Object> could not be copied")),
        }
    }

    /// Materializes the copy as a fresh value. Must run on the thread that
    /// owns the destination isolate.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Undefined => Value::Undefined,
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Boolean(*b),
            Self::Number(n) => Value::Number(*n),
            Self::String(s) => Value::string(s.as_str()),
            Self::Buffer(b) => Value::buffer(b.clone()),
            Self::Error { name, message, stack } => {
                Value::Error(std::sync::Arc::new(ErrorValue {
                    name: name.clone(),
                    message: message.clone(),
                    stack: stack.clone(),
                }))
            }
            Self::Array(elements) => {
                Value::array(elements.iter().map(Self::to_value).collect())
            }
            Self::Object(entries) => {
                let obj = ObjectData::new();
                for (key, v) in entries {
                    obj.set(PropertyKey::string(key), v.to_value());
                }
                Value::Object(obj)
            }
        }
    }

    /// Builds a copy from host-side JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Renders the copy as host-side JSON. `undefined` maps to `null`;
    /// buffers map to byte arrays; errors map to plain objects.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => {
                // Whole numbers render as JSON integers.
                if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    serde_json::Value::Number(serde_json::Number::from(*n as i64))
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Buffer(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::json!(byte)).collect(),
            ),
            Self::Error { name, message, .. } => serde_json::json!({
                "name": name,
                "message": message,
            }),
            Self::Array(elements) => {
                serde_json::Value::Array(elements.iter().map(Self::to_json).collect())
            }
            Self::Object(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}
