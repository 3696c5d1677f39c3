//! Script objects and arrays.
//!
//! Property tables are insertion ordered. Payloads are shared by `Arc` and
//! interior mutable; mutation is only permitted on the owning isolate's
//! thread.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::value::Value;

/// Property key (string or integer index).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    String(Arc<str>),
    Index(u32),
}

impl PropertyKey {
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    pub fn index(i: u32) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A plain script object: an insertion-ordered property table.
#[derive(Default)]
pub struct ObjectData {
    properties: RwLock<IndexMap<PropertyKey, Value>>,
}

impl ObjectData {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.properties.read().get(key).cloned()
    }

    pub fn set(&self, key: PropertyKey, value: Value) {
        self.properties.write().insert(key, value);
    }

    /// Removes a property, releasing the previous binding.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        self.properties.write().shift_remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<PropertyKey> {
        self.properties.read().keys().cloned().collect()
    }

    /// Snapshot of all properties in insertion order.
    pub fn entries(&self) -> Vec<(PropertyKey, Value)> {
        self.properties
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }
}

impl fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({} properties)", self.len())
    }
}

/// A dense script array.
#[derive(Default)]
pub struct ArrayData {
    elements: RwLock<Vec<Value>>,
}

impl ArrayData {
    pub fn new(elements: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            elements: RwLock::new(elements),
        })
    }

    pub fn get(&self, index: u32) -> Option<Value> {
        self.elements.read().get(index as usize).cloned()
    }

    /// Sets an element, growing the array with `undefined` as needed.
    pub fn set(&self, index: u32, value: Value) {
        let mut elements = self.elements.write();
        let index = index as usize;
        if index >= elements.len() {
            elements.resize(index + 1, Value::Undefined);
        }
        elements[index] = value;
    }

    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.elements.read().clone()
    }
}

impl fmt::Debug for ArrayData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array({} elements)", self.len())
    }
}
