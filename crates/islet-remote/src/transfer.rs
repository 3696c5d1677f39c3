//! The transferable value protocol.
//!
//! A [`Transferable`] describes a value in motion between isolates. It is
//! produced under the source isolate's lock (`transfer_out`) and consumed
//! under the destination's (`transfer_in`). Wrapper handles marshal
//! themselves; primitives and explicitly copied values cross as deep
//! copies; everything else crosses by reference, subject to the
//! position-dependent defaults.

use std::sync::Arc;

use islet_vm::{
    Context, CopiedValue, Error, IsolateRef, PromiseData, Result, Scope, TypeTag, Value,
};

use crate::dereference::DereferenceHandle;
use crate::reference::Reference;
use crate::remote::RemoteHandle;

/// Marshaling options attached to a single value, an argument list, or a
/// return value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// Cross by deep copy.
    pub copy: bool,
    /// Cross as a shared deep copy. Behaves as `copy`; the copied tree is
    /// already a single isolate-independent allocation.
    pub external_copy: bool,
    /// Cross as a reference handle.
    pub reference: bool,
    /// Materialize wrapped in an already-resolved promise.
    pub promise: bool,
}

impl TransferOptions {
    pub fn copied() -> Self {
        Self {
            copy: true,
            ..Self::default()
        }
    }

    pub fn referenced() -> Self {
        Self {
            reference: true,
            ..Self::default()
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Parses `{copy?, externalCopy?, reference?, promise?}` from an options
    /// object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            return Err(Error::type_error("Transfer options must be an object"));
        };
        let flag = |key: &str| matches!(obj.get(&key.into()), Some(Value::Boolean(true)));
        let options = Self {
            copy: flag("copy"),
            external_copy: flag("externalCopy"),
            reference: flag("reference"),
            promise: flag("promise"),
        };
        if (options.copy || options.external_copy) && options.reference {
            return Err(Error::type_error(
                "`copy` and `reference` options are mutually exclusive",
            ));
        }
        Ok(options)
    }
}

/// Whether a value is crossing as a call argument or as a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPosition {
    Argument,
    Return,
}

/// The pieces a reference handle is rebuilt from on arrival.
#[derive(Clone)]
pub struct ReferenceParts {
    pub(crate) isolate: IsolateRef,
    pub(crate) value: RemoteHandle<Value>,
    pub(crate) context: RemoteHandle<Context>,
    pub(crate) tag: TypeTag,
}

/// Engine-native shareable payloads; crossing shares the allocation.
pub enum ExternShared {
    Buffer(islet_vm::SharedBytes),
}

/// A value in transit between isolates.
pub enum Transferable {
    /// A deep, self-contained copy.
    Copy(Arc<CopiedValue>),
    /// A remote handle pair that materializes as a new reference handle.
    Reference(ReferenceParts),
    /// A remote handle that materializes back as the live value, only in
    /// its home isolate. Single use.
    Deref(RemoteHandle<Value>),
    /// An engine-native shareable object.
    Extern(ExternShared),
    /// Materializes as a resolved promise around the inner transferable.
    Promised(Box<Transferable>),
}

impl Transferable {
    /// Materializes the value under the destination isolate's lock.
    pub fn transfer_in(self, scope: &Scope<'_>) -> Result<Value> {
        match self {
            Self::Copy(copied) => Ok(copied.to_value()),
            Self::Reference(parts) => {
                Ok(Value::host(Arc::new(Reference::from_parts(parts))))
            }
            Self::Deref(handle) => {
                if scope.isolate_id() != handle.isolate().id() {
                    return Err(Error::type_error(
                        "Cannot dereference this into target isolate",
                    ));
                }
                handle.deref(scope)
            }
            Self::Extern(ExternShared::Buffer(bytes)) => Ok(Value::Buffer(bytes)),
            Self::Promised(inner) => {
                let value = inner.transfer_in(scope)?;
                Ok(Value::Promise(PromiseData::resolved(value)))
            }
        }
    }
}

/// Converts a live value into a transferable under the source isolate's
/// lock.
pub fn transfer_out(
    value: &Value,
    options: TransferOptions,
    position: TransferPosition,
    scope: &Scope<'_>,
) -> Result<Transferable> {
    let base = transfer_out_base(value, options, position, scope)?;
    if options.promise {
        Ok(Transferable::Promised(Box::new(base)))
    } else {
        Ok(base)
    }
}

fn transfer_out_base(
    value: &Value,
    options: TransferOptions,
    position: TransferPosition,
    scope: &Scope<'_>,
) -> Result<Transferable> {
    // Wrapper handles marshal themselves.
    if let Some(reference) = value.downcast_host::<Reference>() {
        return reference.transfer_out();
    }
    if let Some(handle) = value.downcast_host::<DereferenceHandle>() {
        return handle.transfer_out();
    }
    // Primitives always copy; larger values copy on request.
    if options.copy || options.external_copy || value.is_primitive() {
        return Ok(Transferable::Copy(Arc::new(CopiedValue::capture(value)?)));
    }
    // Engine-native shareables cross by sharing the allocation.
    if let Value::Buffer(bytes) = value {
        return Ok(Transferable::Extern(ExternShared::Buffer(bytes.clone())));
    }
    // Results default to crossing by reference; arguments must opt in.
    if options.reference || position == TransferPosition::Return {
        return Ok(Transferable::Reference(ReferenceParts {
            isolate: scope.isolate(),
            value: RemoteHandle::capture(scope, value.clone()),
            context: RemoteHandle::capture(scope, scope.context().clone()),
            tag: value.type_tag(),
        }));
    }
    Err(Error::type_error("A non-transferable value was passed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use islet_vm::Value;

    #[test]
    fn options_parse_flags() {
        let obj = Value::object();
        obj.set_member("copy".into(), Value::boolean(true)).unwrap();
        obj.set_member("promise".into(), Value::boolean(true)).unwrap();
        let options = TransferOptions::from_value(&obj).unwrap();
        assert!(options.copy);
        assert!(options.promise);
        assert!(!options.reference);
    }

    #[test]
    fn options_reject_copy_plus_reference() {
        let obj = Value::object();
        obj.set_member("copy".into(), Value::boolean(true)).unwrap();
        obj.set_member("reference".into(), Value::boolean(true))
            .unwrap();
        let err = TransferOptions::from_value(&obj).unwrap_err();
        assert_eq!(
            err.message(),
            "`copy` and `reference` options are mutually exclusive"
        );
    }

    #[test]
    fn options_require_object() {
        let err = TransferOptions::from_value(&Value::number(1.0)).unwrap_err();
        assert_eq!(err.message(), "Transfer options must be an object");
    }
}
