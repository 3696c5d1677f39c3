//! Three-phase task driver.
//!
//! A cross-isolate operation is a task with three phases: phase 1 runs in
//! the calling isolate (the task's constructor marshals inputs out), phase 2
//! runs under the target isolate's lock, and phase 3 runs back under the
//! caller's lock to marshal outputs in. The driver here is a set of
//! routines parameterized over the task's capabilities, one per async mode:
//!
//! - `run_sync` blocks the calling thread on a wait gate until phase 2
//!   completes, then runs phase 3 inline.
//! - `run_async` returns a promise in the calling isolate; phase 3 is
//!   scheduled onto the caller's queue on completion.
//! - `run_ignored` is fire and forget; phase 2 errors are logged.
//!
//! Phase 2 may also *park* the task ([`Phase2Flow::Pending`]) and finish it
//! later from a settlement callback; that is how a synchronous caller awaits
//! a promise produced in the target isolate. The shared [`PendingTask`]
//! carries the `did_finish` flag that arbitrates between completion, late
//! settlement, timeout expiry, and disposal: whichever claims it first wins
//! and every later attempt is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use islet_vm::{Error, ErrorValue, IsolateRef, Result, Scope, Value};

/// What phase 2 did with the task.
pub(crate) enum Phase2Flow {
    /// Phase 2 completed; outputs are stored in the task.
    Finished,
    /// The task parked itself on the pending state and will be finished by a
    /// settlement callback.
    Pending,
}

/// A task that can be driven across isolates.
pub(crate) trait RemoteTask: Send + Sized + 'static {
    type Output: Send + 'static;

    /// Runs under the target isolate's lock.
    fn phase2(
        &mut self,
        scope: &mut Scope<'_>,
        pending: &Arc<PendingTask<Self>>,
    ) -> Result<Phase2Flow>;

    /// Runs back under the caller's lock once phase 2 has finished.
    fn phase3(self, scope: &mut Scope<'_>) -> Result<Self::Output>;
}

type Deliver<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Shared in-flight state of a dispatched task.
///
/// Co-owned by the phase 2 closure, any settlement callbacks, and any armed
/// timeout, so it outlives whichever of them dies first. The parked task is
/// only touched by whoever wins the `finished` flag.
pub(crate) struct PendingTask<T> {
    finished: AtomicBool,
    parked: Mutex<Option<T>>,
    deliver: Mutex<Option<Deliver<T>>>,
}

impl<T: Send + 'static> PendingTask<T> {
    pub(crate) fn new(deliver: Deliver<T>) -> Arc<Self> {
        Arc::new(Self {
            finished: AtomicBool::new(false),
            parked: Mutex::new(None),
            deliver: Mutex::new(Some(deliver)),
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn claim(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }

    fn send(&self, outcome: Result<T>) {
        if let Some(deliver) = self.deliver.lock().take() {
            deliver(outcome);
        }
    }

    /// Completes the task with `outcome` if nothing else finished it first.
    pub(crate) fn finish(&self, outcome: Result<T>) -> bool {
        if self.claim() {
            self.send(outcome);
            true
        } else {
            false
        }
    }

    /// Stores the task for a later settlement callback.
    pub(crate) fn park(&self, task: T) {
        *self.parked.lock() = Some(task);
    }

    /// Completes a parked task, giving `mutate` a chance to store outputs.
    pub(crate) fn finish_parked(&self, mutate: impl FnOnce(&mut T)) -> bool {
        if !self.claim() {
            return false;
        }
        match self.parked.lock().take() {
            Some(mut task) => {
                mutate(&mut task);
                self.send(Ok(task));
            }
            None => self.send(Err(Error::internal("In-flight task state is missing"))),
        }
        true
    }
}

/// Resolves an abandoned task with the disposed error if its phase 2
/// closure is dropped unrun (isolate disposal cancelling the queue).
struct PendingGuard<T: Send + 'static> {
    pending: Option<Arc<PendingTask<T>>>,
}

impl<T: Send + 'static> PendingGuard<T> {
    fn new(pending: Arc<PendingTask<T>>) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    fn disarm(mut self) {
        self.pending = None;
    }
}

impl<T: Send + 'static> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.finish(Err(Error::Disposed));
        }
    }
}

fn execute_phase2<T: RemoteTask>(
    mut task: T,
    pending: Arc<PendingTask<T>>,
    scope: &mut Scope<'_>,
) {
    if pending.is_finished() {
        return;
    }
    match task.phase2(scope, &pending) {
        Ok(Phase2Flow::Finished) => {
            pending.finish(Ok(task));
        }
        Ok(Phase2Flow::Pending) => pending.park(task),
        Err(error) => {
            pending.finish(Err(crossing_error(error)));
        }
    }
}

fn dispatch_phase2<T: RemoteTask>(target: &IsolateRef, task: T, pending: &Arc<PendingTask<T>>) {
    let guard = PendingGuard::new(pending.clone());
    let pending = pending.clone();
    // A failed submission drops the closure, which fires the guard.
    let _ = target.schedule(move |scope| {
        guard.disarm();
        execute_phase2(task, pending, scope);
    });
}

/// Runs the task, blocking the calling thread until phase 3 returns.
///
/// A task targeted at the calling isolate itself runs inline instead of
/// deadlocking on its own queue.
pub(crate) fn run_sync<T: RemoteTask>(
    scope: &mut Scope<'_>,
    target: &IsolateRef,
    task: T,
) -> Result<T::Output> {
    if target.id() == scope.isolate_id() {
        return run_inline(scope, task);
    }
    let (tx, rx) = crossbeam_channel::bounded(1);
    let pending = PendingTask::new(Box::new(move |outcome| {
        let _ = tx.send(outcome);
    }));
    dispatch_phase2(target, task, &pending);
    let task = rx.recv().map_err(|_| Error::Disposed)??;
    task.phase3(scope)
}

fn run_inline<T: RemoteTask>(scope: &mut Scope<'_>, task: T) -> Result<T::Output> {
    let slot: Arc<Mutex<Option<Result<T>>>> = Arc::new(Mutex::new(None));
    let deliver_slot = slot.clone();
    let pending = PendingTask::new(Box::new(move |outcome| {
        *deliver_slot.lock() = Some(outcome);
    }));
    execute_phase2(task, pending, scope);
    match slot.lock().take() {
        Some(outcome) => outcome?.phase3(scope),
        None => Err(Error::internal("Inline task did not complete")),
    }
}

/// Runs the task and returns a promise in the calling isolate. Phase 3 runs
/// on the caller's queue when phase 2 completes.
pub(crate) fn run_async<T>(scope: &mut Scope<'_>, target: &IsolateRef, task: T) -> Result<Value>
where
    T: RemoteTask<Output = Value>,
{
    let (promise, resolver) = scope.create_promise();
    let caller = scope.isolate();
    let pending = PendingTask::new(Box::new(move |outcome: Result<T>| {
        let scheduled = caller.schedule(move |scope| {
            let settled = outcome.and_then(|task| task.phase3(scope));
            match settled {
                Ok(value) => resolver.settle_in(scope, Ok(value)),
                Err(error) => {
                    let error = error_to_value(&error);
                    resolver.settle_in(scope, Err(error));
                }
            }
        });
        if scheduled.is_err() {
            debug!("calling isolate disposed before task completion");
        }
    }));
    dispatch_phase2(target, task, &pending);
    Ok(promise)
}

/// Fire and forget: phase 3 never runs, phase 2 errors are logged.
pub(crate) fn run_ignored<T: RemoteTask>(target: &IsolateRef, task: T) {
    let pending = PendingTask::new(Box::new(|outcome: Result<T>| {
        if let Err(error) = outcome {
            warn!(error = %error, "ignored cross-isolate task failed");
        }
    }));
    dispatch_phase2(target, task, &pending);
}

/// Synthetic message for thrown or rejected values that are not error
/// objects.
pub(crate) const NON_ERROR_THROWN: &str =
    "Script threw a value that is not an instance of Error";

/// Converts a thrown script value into an error safe to carry across
/// isolates. Error objects keep their message and stack; anything else is
/// replaced by the synthetic message.
pub(crate) fn runtime_from_thrown(value: Value) -> Error {
    match value {
        Value::Error(e) => Error::runtime(e.message.clone(), e.stack.clone()),
        _ => Error::runtime(NON_ERROR_THROWN, None),
    }
}

fn crossing_error(error: Error) -> Error {
    match error {
        Error::Thrown(value) => runtime_from_thrown(value),
        other => other,
    }
}

/// Renders an error as a script error value for promise rejection.
pub(crate) fn error_to_value(error: &Error) -> Value {
    let name = match error {
        Error::Type(_) => "TypeError",
        Error::Runtime { .. } => "RuntimeError",
        Error::Internal(_) => "InternalError",
        _ => "Error",
    };
    let stack = match error {
        Error::Runtime { stack, .. } => stack.clone(),
        _ => None,
    };
    Value::Error(Arc::new(ErrorValue {
        name: name.to_string(),
        message: error.message(),
        stack,
    }))
}
