//! Script values.
//!
//! Values are reference counted; heap variants share their payload through
//! `Arc`, so a value can be moved freely between threads. Mutating a heap
//! payload (object properties, array elements) is only permitted on the
//! owning isolate's thread; that discipline is enforced by the isolate
//! scheduling layer, not by the type system.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::isolate::Scope;
use crate::object::{ArrayData, ObjectData, PropertyKey};
use crate::promise::PromiseData;

/// Host-native function payload.
///
/// Receives `(scope, this, args)` and runs on the isolate thread that owns
/// the function's creation context.
pub type NativeFn =
    Arc<dyn Fn(&mut Scope<'_>, Value, &[Value]) -> Result<Value> + Send + Sync>;

/// A function value: an optional name plus the native callable.
pub struct FunctionData {
    name: Option<String>,
    native: NativeFn,
}

impl FunctionData {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn native(&self) -> &NativeFn {
        &self.native
    }
}

/// A script error object.
#[derive(Debug, Clone)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorValue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
        }
    }
}

/// Opaque embedder object payload. The runtime layer stores its wrapper
/// handles (references, one-shot dereference handles) in value space through
/// this slot and recovers them with [`Value::downcast_host`].
pub type HostRef = Arc<dyn Any + Send + Sync>;

/// Shareable byte buffer; crossing an isolate boundary shares the allocation.
pub type SharedBytes = Arc<Vec<u8>>;

/// A script value.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
    Object(Arc<ObjectData>),
    Array(Arc<ArrayData>),
    Function(Arc<FunctionData>),
    Promise(Arc<PromiseData>),
    Error(Arc<ErrorValue>),
    Buffer(SharedBytes),
    Host(HostRef),
}

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    pub fn boolean(b: bool) -> Self {
        Self::Boolean(b)
    }

    pub fn object() -> Self {
        Self::Object(ObjectData::new())
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Self::Array(ArrayData::new(elements))
    }

    pub fn function<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Scope<'_>, Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(FunctionData {
            name: Some(name.into()),
            native: Arc::new(f),
        }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(Arc::new(ErrorValue::new(message)))
    }

    pub fn buffer(bytes: Vec<u8>) -> Self {
        Self::Buffer(Arc::new(bytes))
    }

    pub fn host<T: Any + Send + Sync>(payload: Arc<T>) -> Self {
        Self::Host(payload)
    }

    /// Recovers an embedder object previously stored with [`Value::host`].
    pub fn downcast_host<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Host(h) => h.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Undefined => TypeTag::Undefined,
            Self::Null => TypeTag::Null,
            Self::Boolean(_) => TypeTag::Boolean,
            Self::Number(_) => TypeTag::Number,
            Self::String(_) => TypeTag::String,
            Self::Function(_) => TypeTag::Function,
            Self::Object(_)
            | Self::Array(_)
            | Self::Promise(_)
            | Self::Error(_)
            | Self::Buffer(_)
            | Self::Host(_) => TypeTag::Object,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Undefined | Self::Null | Self::Boolean(_) | Self::Number(_) | Self::String(_)
        )
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<ObjectData>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<ArrayData>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<FunctionData>> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Arc<PromiseData>> {
        match self {
            Self::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Reads a property. Only objects and arrays carry properties; a missing
    /// property reads as `undefined`.
    pub fn get_member(&self, key: &PropertyKey) -> Result<Value> {
        match self {
            Self::Object(obj) => Ok(obj.get(key).unwrap_or(Value::Undefined)),
            Self::Array(arr) => match key {
                PropertyKey::Index(i) => Ok(arr.get(*i).unwrap_or(Value::Undefined)),
                PropertyKey::String(s) if &**s == "length" => {
                    Ok(Value::Number(arr.len() as f64))
                }
                PropertyKey::String(_) => Ok(Value::Undefined),
            },
            _ => Err(Error::type_error(
                "Cannot read properties of a non-object value",
            )),
        }
    }

    /// Writes a property. Returns whether the write was accepted.
    pub fn set_member(&self, key: PropertyKey, value: Value) -> Result<bool> {
        match self {
            Self::Object(obj) => {
                obj.set(key, value);
                Ok(true)
            }
            Self::Array(arr) => match key {
                PropertyKey::Index(i) => {
                    arr.set(i, value);
                    Ok(true)
                }
                PropertyKey::String(_) => Ok(false),
            },
            _ => Err(Error::type_error(
                "Cannot set properties of a non-object value",
            )),
        }
    }

    /// Removes a property binding.
    pub fn delete_member(&self, key: &PropertyKey) -> Result<()> {
        match self {
            Self::Object(obj) => {
                obj.delete(key);
                Ok(())
            }
            Self::Array(arr) => {
                if let PropertyKey::Index(i) = key {
                    if (*i as usize) < arr.len() {
                        arr.set(*i, Value::Undefined);
                    }
                }
                Ok(())
            }
            _ => Err(Error::type_error(
                "Cannot delete properties of a non-object value",
            )),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(o) => o.fmt(f),
            Self::Array(a) => a.fmt(f),
            Self::Function(func) => {
                write!(f, "Function({})", func.name().unwrap_or("<anonymous>"))
            }
            Self::Promise(p) => p.fmt(f),
            Self::Error(e) => write!(f, "{}: {}", e.name, e.message),
            Self::Buffer(b) => write!(f, "Buffer({} bytes)", b.len()),
            Self::Host(_) => write!(f, "<host object>"),
        }
    }
}

/// The classification a reference caches for its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Null,
    Undefined,
    Number,
    String,
    Boolean,
    Object,
    Function,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags() {
        assert_eq!(Value::Null.type_tag().as_str(), "null");
        assert_eq!(Value::Undefined.type_tag().as_str(), "undefined");
        assert_eq!(Value::number(1.5).type_tag().as_str(), "number");
        assert_eq!(Value::string("x").type_tag().as_str(), "string");
        assert_eq!(Value::boolean(true).type_tag().as_str(), "boolean");
        assert_eq!(Value::object().type_tag().as_str(), "object");
        assert_eq!(
            Value::function("f", |_, _, _| Ok(Value::Undefined))
                .type_tag()
                .as_str(),
            "function"
        );
    }

    #[test]
    fn member_access_on_objects() {
        let obj = Value::object();
        assert!(obj.set_member("a".into(), Value::number(1.0)).unwrap());
        assert!(matches!(
            obj.get_member(&"a".into()).unwrap(),
            Value::Number(n) if n == 1.0
        ));
        assert!(obj.get_member(&"missing".into()).unwrap().is_undefined());
    }

    #[test]
    fn member_access_on_primitives_fails() {
        let err = Value::number(1.0).get_member(&"a".into()).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn array_length_and_elements() {
        let arr = Value::array(vec![Value::number(1.0), Value::number(2.0)]);
        assert!(matches!(
            arr.get_member(&PropertyKey::string("length")).unwrap(),
            Value::Number(n) if n == 2.0
        ));
        assert!(matches!(
            arr.get_member(&PropertyKey::index(1)).unwrap(),
            Value::Number(n) if n == 2.0
        ));
    }

    #[test]
    fn host_roundtrip() {
        struct Marker(u32);
        let v = Value::host(Arc::new(Marker(7)));
        assert_eq!(v.type_tag(), TypeTag::Object);
        let back = v.downcast_host::<Marker>().unwrap();
        assert_eq!(back.0, 7);
    }
}
