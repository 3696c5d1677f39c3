//! Reference handles.
//!
//! A [`Reference`] names a value captured in some isolate and can be held
//! and operated on from any other isolate. Local operations (`type_of`,
//! `release`, `deref_into`) never leave the current thread; everything else
//! is a three-phase task against the owning isolate. Sync variants block
//! the calling thread, async variants return a promise in the calling
//! isolate, and ignored variants are fire and forget.

use std::sync::Arc;

use parking_lot::Mutex;

use islet_vm::{Context, CopiedValue, Error, IsolateRef, PropertyKey, Result, Scope, TypeTag, Value};

use crate::apply::{ApplyOptions, ApplyRunner, arguments_list};
use crate::dereference::DereferenceHandle;
use crate::remote::RemoteHandle;
use crate::task::{Phase2Flow, PendingTask, RemoteTask, run_async, run_ignored, run_sync};
use crate::transfer::{
    ReferenceParts, Transferable, TransferOptions, TransferPosition, transfer_out,
};

/// Options for `deref` and `deref_into`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerefOptions {
    /// Release the reference after producing the result.
    pub release: bool,
}

fn released() -> Error {
    Error::generic("Reference has been released")
}

/// A handle to a value owned by some isolate.
///
/// All four pieces of state (owning isolate, value handle, context handle,
/// cached type tag) are live until release, then cleared together. A
/// released reference fails every operation; dropping a reference releases
/// it implicitly.
pub struct Reference {
    inner: Mutex<Option<ReferenceParts>>,
}

impl Reference {
    /// Captures `value` in the currently locked isolate, binding the
    /// reference to the current context.
    pub fn new(scope: &Scope<'_>, value: Value) -> Self {
        let parts = ReferenceParts {
            isolate: scope.isolate(),
            tag: value.type_tag(),
            context: RemoteHandle::capture(scope, scope.context().clone()),
            value: RemoteHandle::capture(scope, value),
        };
        Self {
            inner: Mutex::new(Some(parts)),
        }
    }

    pub(crate) fn from_parts(parts: ReferenceParts) -> Self {
        Self {
            inner: Mutex::new(Some(parts)),
        }
    }

    fn snapshot(&self) -> Result<ReferenceParts> {
        self.inner.lock().clone().ok_or_else(released)
    }

    /// Marshals this reference for a boundary crossing. In-flight copies
    /// co-own the underlying handles, so releasing the reference afterwards
    /// does not invalidate them.
    pub(crate) fn transfer_out(&self) -> Result<Transferable> {
        Ok(Transferable::Reference(self.snapshot()?))
    }

    /// The owning isolate.
    pub fn isolate(&self) -> Result<IsolateRef> {
        Ok(self.snapshot()?.isolate)
    }

    /// The cached classification of the referenced value. Local; never
    /// requires a cross-isolate trip.
    pub fn type_of(&self) -> Result<TypeTag> {
        Ok(self.snapshot()?.tag)
    }

    /// Produces the referenced value. Only valid in the owning isolate.
    pub fn deref(&self, scope: &Scope<'_>, options: DerefOptions) -> Result<Value> {
        let state = self.snapshot()?;
        if scope.isolate_id() != state.isolate.id() {
            return Err(Error::type_error(
                "Cannot dereference this from current isolate",
            ));
        }
        let value = state.value.deref(scope)?;
        if options.release {
            let _ = self.release();
        }
        Ok(value)
    }

    /// Produces a one-shot transferable that re-materializes the referenced
    /// value when it arrives back in the owning isolate.
    pub fn deref_into(&self, options: DerefOptions) -> Result<Value> {
        let state = self.snapshot()?;
        let handle = state.value.clone();
        if options.release {
            let _ = self.release();
        }
        Ok(Value::host(Arc::new(DereferenceHandle::new(handle))))
    }

    /// Clears the reference. Handle destruction is deferred to the owning
    /// isolate's queue. Fails if already released.
    pub fn release(&self) -> Result<()> {
        match self.inner.lock().take() {
            Some(state) => {
                drop(state);
                Ok(())
            }
            None => Err(released()),
        }
    }

    /// Deep-copies the referenced value into the calling isolate; returns a
    /// promise for the copy.
    pub fn copy(&self, scope: &mut Scope<'_>) -> Result<Value> {
        let state = self.snapshot()?;
        let isolate = state.isolate.clone();
        run_async(scope, &isolate, CopyRunner::new(state))
    }

    /// Deep-copies the referenced value into the calling isolate.
    pub fn copy_sync(&self, scope: &mut Scope<'_>) -> Result<Value> {
        let state = self.snapshot()?;
        let isolate = state.isolate.clone();
        run_sync(scope, &isolate, CopyRunner::new(state))
    }

    /// Reads a property in the owning isolate; returns a promise for the
    /// marshaled result.
    pub fn get(
        &self,
        scope: &mut Scope<'_>,
        key: &Value,
        options: TransferOptions,
    ) -> Result<Value> {
        let state = self.snapshot()?;
        let key = property_key(key)?;
        let isolate = state.isolate.clone();
        run_async(scope, &isolate, GetRunner::new(state, key, options))
    }

    /// Reads a property in the owning isolate.
    pub fn get_sync(
        &self,
        scope: &mut Scope<'_>,
        key: &Value,
        options: TransferOptions,
    ) -> Result<Value> {
        let state = self.snapshot()?;
        let key = property_key(key)?;
        let isolate = state.isolate.clone();
        run_sync(scope, &isolate, GetRunner::new(state, key, options))
    }

    /// Writes a property in the owning isolate; returns a promise for the
    /// acceptance flag.
    pub fn set(
        &self,
        scope: &mut Scope<'_>,
        key: &Value,
        value: &Value,
        options: TransferOptions,
    ) -> Result<Value> {
        let (isolate, runner) = self.build_set(scope, key, value, options)?;
        run_async(scope, &isolate, runner)
    }

    /// Writes a property in the owning isolate.
    pub fn set_sync(
        &self,
        scope: &mut Scope<'_>,
        key: &Value,
        value: &Value,
        options: TransferOptions,
    ) -> Result<bool> {
        let (isolate, runner) = self.build_set(scope, key, value, options)?;
        let accepted = run_sync(scope, &isolate, runner)?;
        Ok(matches!(accepted, Value::Boolean(true)))
    }

    /// Writes a property, fire and forget.
    pub fn set_ignored(
        &self,
        scope: &mut Scope<'_>,
        key: &Value,
        value: &Value,
        options: TransferOptions,
    ) -> Result<()> {
        let (isolate, runner) = self.build_set(scope, key, value, options)?;
        run_ignored(&isolate, runner);
        Ok(())
    }

    /// Invokes the referenced function; returns a promise for the result.
    pub fn apply(
        &self,
        scope: &mut Scope<'_>,
        receiver: Option<&Value>,
        args: Option<&Value>,
        options: &ApplyOptions,
    ) -> Result<Value> {
        let (isolate, runner) = self.build_apply(scope, receiver, args, options, false)?;
        run_async(scope, &isolate, runner)
    }

    /// Invokes the referenced function, blocking until the result is back.
    pub fn apply_sync(
        &self,
        scope: &mut Scope<'_>,
        receiver: Option<&Value>,
        args: Option<&Value>,
        options: &ApplyOptions,
    ) -> Result<Value> {
        let (isolate, runner) = self.build_apply(scope, receiver, args, options, false)?;
        run_sync(scope, &isolate, runner)
    }

    /// Invokes the referenced function, fire and forget. Errors raised in
    /// the target are logged, not reported.
    pub fn apply_ignored(
        &self,
        scope: &mut Scope<'_>,
        receiver: Option<&Value>,
        args: Option<&Value>,
        options: &ApplyOptions,
    ) -> Result<()> {
        let (isolate, runner) = self.build_apply(scope, receiver, args, options, false)?;
        run_ignored(&isolate, runner);
        Ok(())
    }

    /// Invokes the referenced function and, if it returns a promise, blocks
    /// until that promise settles in the owning isolate. The owning isolate
    /// stays free to run other tasks while the caller waits.
    pub fn apply_sync_promise(
        &self,
        scope: &mut Scope<'_>,
        receiver: Option<&Value>,
        args: Option<&Value>,
        options: &ApplyOptions,
    ) -> Result<Value> {
        if !options.return_options.is_default() {
            return Err(Error::type_error(
                "`return` options are not available for `applySyncPromise`",
            ));
        }
        let (isolate, runner) = self.build_apply(scope, receiver, args, options, true)?;
        if isolate.id() == scope.isolate_id() {
            return Err(Error::generic(
                "Cannot call applySyncPromise from the isolate that owns the reference",
            ));
        }
        run_sync(scope, &isolate, runner)
    }

    fn build_set(
        &self,
        scope: &mut Scope<'_>,
        key: &Value,
        value: &Value,
        options: TransferOptions,
    ) -> Result<(IsolateRef, SetRunner)> {
        let state = self.snapshot()?;
        let key = property_key(key)?;
        let input = transfer_out(value, options, TransferPosition::Argument, scope)?;
        let isolate = state.isolate.clone();
        Ok((isolate, SetRunner::new(state, key, input)))
    }

    fn build_apply(
        &self,
        scope: &mut Scope<'_>,
        receiver: Option<&Value>,
        args: Option<&Value>,
        options: &ApplyOptions,
        bridge_promise: bool,
    ) -> Result<(IsolateRef, ApplyRunner)> {
        let state = self.snapshot()?;
        let arg_values = arguments_list(args)?;
        let receiver = transfer_out(
            receiver.unwrap_or(&Value::Undefined),
            options.arguments,
            TransferPosition::Argument,
            scope,
        )?;
        let mut argv = Vec::with_capacity(arg_values.len());
        for value in &arg_values {
            argv.push(transfer_out(
                value,
                options.arguments,
                TransferPosition::Argument,
                scope,
            )?);
        }
        let isolate = state.isolate.clone();
        let runner = ApplyRunner::new(
            state.value,
            state.context,
            receiver,
            argv,
            options,
            bridge_promise,
        );
        Ok((isolate, runner))
    }
}

impl std::fmt::Debug for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.inner.lock() {
            Some(state) => write!(
                f,
                "Reference({} in isolate {})",
                state.tag,
                state.isolate.id()
            ),
            None => write!(f, "Reference(released)"),
        }
    }
}

/// Keys are copied as primitives; anything else is rejected.
fn property_key(key: &Value) -> Result<PropertyKey> {
    match key {
        Value::String(s) => Ok(PropertyKey::String(s.clone())),
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 => {
            Ok(PropertyKey::Index(*n as u32))
        }
        _ => Err(Error::type_error("Invalid `key`")),
    }
}

/// Three-phase deep copy of the referenced value.
struct CopyRunner {
    value: RemoteHandle<Value>,
    result: Option<Arc<CopiedValue>>,
}

impl CopyRunner {
    fn new(state: ReferenceParts) -> Self {
        Self {
            value: state.value,
            result: None,
        }
    }
}

impl RemoteTask for CopyRunner {
    type Output = Value;

    fn phase2(
        &mut self,
        scope: &mut Scope<'_>,
        _pending: &Arc<PendingTask<Self>>,
    ) -> Result<Phase2Flow> {
        let value = self.value.deref(scope)?;
        self.result = Some(Arc::new(CopiedValue::capture(&value)?));
        Ok(Phase2Flow::Finished)
    }

    fn phase3(self, _scope: &mut Scope<'_>) -> Result<Value> {
        match self.result {
            Some(copied) => Ok(copied.to_value()),
            None => Ok(Value::Undefined),
        }
    }
}

/// Three-phase property read.
struct GetRunner {
    value: RemoteHandle<Value>,
    context: RemoteHandle<Context>,
    key: PropertyKey,
    options: TransferOptions,
    result: Option<Transferable>,
}

impl GetRunner {
    fn new(state: ReferenceParts, key: PropertyKey, options: TransferOptions) -> Self {
        Self {
            value: state.value,
            context: state.context,
            key,
            options,
            result: None,
        }
    }
}

impl RemoteTask for GetRunner {
    type Output = Value;

    fn phase2(
        &mut self,
        scope: &mut Scope<'_>,
        _pending: &Arc<PendingTask<Self>>,
    ) -> Result<Phase2Flow> {
        let value = self.value.deref(scope)?;
        let context = self.context.deref(scope)?;
        scope.with_context(context, |scope| {
            let member = value.get_member(&self.key)?;
            self.result = Some(transfer_out(
                &member,
                self.options,
                TransferPosition::Return,
                scope,
            )?);
            Ok(Phase2Flow::Finished)
        })
    }

    fn phase3(mut self, scope: &mut Scope<'_>) -> Result<Value> {
        match self.result.take() {
            Some(result) => result.transfer_in(scope),
            None => Ok(Value::Undefined),
        }
    }
}

/// Three-phase property write. The previous binding is deleted before the
/// new value lands, so replacing a large value never holds both at once.
struct SetRunner {
    value: RemoteHandle<Value>,
    context: RemoteHandle<Context>,
    key: PropertyKey,
    input: Option<Transferable>,
    accepted: bool,
}

impl SetRunner {
    fn new(state: ReferenceParts, key: PropertyKey, input: Transferable) -> Self {
        Self {
            value: state.value,
            context: state.context,
            key,
            input: Some(input),
            accepted: false,
        }
    }
}

impl RemoteTask for SetRunner {
    type Output = Value;

    fn phase2(
        &mut self,
        scope: &mut Scope<'_>,
        _pending: &Arc<PendingTask<Self>>,
    ) -> Result<Phase2Flow> {
        let target = self.value.deref(scope)?;
        let context = self.context.deref(scope)?;
        scope.with_context(context, |scope| {
            let input = match self.input.take() {
                Some(t) => t.transfer_in(scope)?,
                None => Value::Undefined,
            };
            target.delete_member(&self.key)?;
            self.accepted = target.set_member(self.key.clone(), input)?;
            Ok(Phase2Flow::Finished)
        })
    }

    fn phase3(self, _scope: &mut Scope<'_>) -> Result<Value> {
        Ok(Value::Boolean(self.accepted))
    }
}
