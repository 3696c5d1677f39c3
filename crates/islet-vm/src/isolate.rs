//! Isolates.
//!
//! An isolate is an independent script execution environment with its own
//! globals, task queue, and microtask queue. Each isolate is driven by a
//! single dedicated worker thread, so holding a [`Scope`] *is* holding the
//! isolate's lock: at most one thread ever touches isolate-owned state.
//!
//! Cross-thread access goes through [`IsolateRef`], which is `Send + Sync +
//! Clone` and only carries the task queue sender plus shared flags, in the
//! spirit of the V8 isolate/handle split.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::object::ObjectData;
use crate::promise::{PromiseData, PromiseResolver};
use crate::value::Value;

/// A unit of work executed on the isolate's thread.
pub(crate) type TaskFn = Box<dyn FnOnce(&mut Scope<'_>) + Send>;

/// Configuration for spawning an isolate.
#[derive(Debug, Clone, Default)]
pub struct IsolateOptions {
    /// Thread and log name. Defaults to `islet-isolate-<id>`.
    pub name: Option<String>,
}

pub(crate) struct IsolateShared {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) disposed: AtomicBool,
}

/// Thread-safe handle to an isolate.
///
/// The handle can be cloned and shared freely. All work on the isolate's
/// state happens on its worker thread; the handle only submits tasks and
/// reads flags.
#[derive(Clone)]
pub struct IsolateRef {
    tx: Sender<TaskFn>,
    shared: Arc<IsolateShared>,
}

impl IsolateRef {
    pub(crate) fn new(tx: Sender<TaskFn>, shared: Arc<IsolateShared>) -> Self {
        Self { tx, shared }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Submits a task for execution on the isolate's thread. Tasks from one
    /// submitter run in submission order.
    pub fn schedule<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Scope<'_>) + Send + 'static,
    {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        self.tx.send(Box::new(f)).map_err(|_| Error::Disposed)
    }

    /// Runs a closure inside the isolate and blocks until it returns.
    ///
    /// This is the host-side entry point; code already running on an isolate
    /// thread should prefer [`IsolateRef::schedule`] to avoid blocking its
    /// own queue.
    pub fn run<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.schedule(move |scope| {
            let _ = tx.send(f(scope));
        })?;
        rx.recv().map_err(|_| Error::Disposed)?
    }

    /// Marks the isolate disposed and wakes its worker. Queued tasks are
    /// cancelled: their closures are dropped without running.
    pub fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        // Wake the worker in case the queue is empty.
        let _ = self.tx.send(Box::new(|_| {}));
    }
}

impl PartialEq for IsolateRef {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for IsolateRef {}

impl std::fmt::Debug for IsolateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IsolateRef({}, {})", self.shared.id, self.shared.name)
    }
}

/// Thread-confined isolate state, owned by the worker thread.
pub(crate) struct Isolate {
    pub(crate) shared: Arc<IsolateShared>,
    self_ref: IsolateRef,
    default_context: Context,
    microtasks: VecDeque<TaskFn>,
}

impl Isolate {
    pub(crate) fn new(shared: Arc<IsolateShared>, self_ref: IsolateRef) -> Self {
        Self {
            shared,
            self_ref,
            default_context: Context::new(),
            microtasks: VecDeque::new(),
        }
    }

    /// Runs one task, then drains the microtask queue.
    pub(crate) fn run_task(&mut self, task: TaskFn) {
        {
            let mut scope = Scope::new(self);
            task(&mut scope);
        }
        self.drain_microtasks();
    }

    fn drain_microtasks(&mut self) {
        while let Some(microtask) = self.microtasks.pop_front() {
            let mut scope = Scope::new(self);
            microtask(&mut scope);
        }
    }
}

/// Capability for code running on an isolate's thread.
///
/// A scope carries the current context and the per-call interrupt token.
/// Holding `&mut Scope` is proof of being inside the isolate's lock, which
/// is what value-handle dereferencing checks against.
pub struct Scope<'iso> {
    isolate: &'iso mut Isolate,
    context: Context,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'iso> Scope<'iso> {
    pub(crate) fn new(isolate: &'iso mut Isolate) -> Self {
        let context = isolate.default_context.clone();
        Self {
            isolate,
            context,
            interrupt: None,
        }
    }

    pub fn isolate_id(&self) -> u64 {
        self.isolate.shared.id
    }

    /// A cross-thread handle to this isolate.
    pub fn isolate(&self) -> IsolateRef {
        self.isolate.self_ref.clone()
    }

    /// The context the scope is currently entered in.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn global(&self) -> Arc<ObjectData> {
        self.context.global().clone()
    }

    /// Runs `f` with `context` entered, restoring the previous context after.
    pub fn with_context<R>(&mut self, context: Context, f: impl FnOnce(&mut Scope<'_>) -> R) -> R {
        let saved = std::mem::replace(&mut self.context, context);
        let result = f(self);
        self.context = saved;
        result
    }

    /// Runs `f` with `token` installed as the interrupt token. Script-level
    /// work inside `f` observes the token through [`Scope::check_interrupt`].
    pub fn with_interrupt<R>(
        &mut self,
        token: Arc<AtomicBool>,
        f: impl FnOnce(&mut Scope<'_>) -> R,
    ) -> R {
        let saved = std::mem::replace(&mut self.interrupt, Some(token));
        let result = f(self);
        self.interrupt = saved;
        result
    }

    /// Cooperative termination check. Long-running native functions call
    /// this in their loops; a set token unwinds them with
    /// [`Error::Interrupted`].
    pub fn check_interrupt(&self) -> Result<()> {
        if let Some(token) = &self.interrupt {
            if token.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }
        }
        Ok(())
    }

    /// Queues a microtask; microtasks run after the current task, in order.
    pub fn enqueue_microtask<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Scope<'_>) + Send + 'static,
    {
        self.isolate.microtasks.push_back(Box::new(f));
    }

    /// Invokes a function value with the given receiver and arguments.
    pub fn call(&mut self, function: &Value, this: Value, args: &[Value]) -> Result<Value> {
        let native = match function {
            Value::Function(f) => f.native().clone(),
            _ => return Err(Error::type_error("Value is not a function")),
        };
        native(self, this, args)
    }

    /// Creates a pending promise owned by this isolate.
    pub fn create_promise(&mut self) -> (Value, PromiseResolver) {
        let promise = PromiseData::new();
        let resolver = PromiseResolver::new(self.isolate(), promise.clone());
        (Value::Promise(promise), resolver)
    }
}
