//! Promises.
//!
//! A promise is settled at most once, always on its owning isolate's thread.
//! Settlement callbacks never run inline; they are dispatched through the
//! isolate's microtask queue so observers see a stable ordering regardless
//! of when they subscribed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::isolate::{IsolateRef, Scope};
use crate::value::Value;

/// Settled outcome: `Ok` for fulfillment, `Err` for rejection.
pub type Settlement = std::result::Result<Value, Value>;

/// Promise state.
#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

type SettleCallback = Box<dyn FnOnce(&mut Scope<'_>, Settlement) + Send>;

/// A promise value's shared payload.
pub struct PromiseData {
    state: Mutex<PromiseState>,
    callbacks: Mutex<Vec<SettleCallback>>,
}

impl PromiseData {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState::Pending),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// An already fulfilled promise.
    pub fn resolved(value: Value) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState::Fulfilled(value)),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// An already rejected promise.
    pub fn rejected(error: Value) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState::Rejected(error)),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> PromiseState {
        self.state.lock().clone()
    }

    /// Readable from any thread.
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.lock(), PromiseState::Pending)
    }

    /// Settles the promise and schedules registered callbacks as microtasks.
    /// A second settlement is a no-op.
    pub fn settle(&self, scope: &mut Scope<'_>, settlement: Settlement) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, PromiseState::Pending) {
                return;
            }
            *state = match &settlement {
                Ok(v) => PromiseState::Fulfilled(v.clone()),
                Err(e) => PromiseState::Rejected(e.clone()),
            };
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            let settlement = settlement.clone();
            scope.enqueue_microtask(move |scope| callback(scope, settlement));
        }
    }

    /// Registers a settlement callback. If the promise is already settled the
    /// callback is still deferred through the microtask queue.
    pub fn on_settled<F>(&self, scope: &mut Scope<'_>, callback: F)
    where
        F: FnOnce(&mut Scope<'_>, Settlement) + Send + 'static,
    {
        let settled = match &*self.state.lock() {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(v) => Some(Ok(v.clone())),
            PromiseState::Rejected(e) => Some(Err(e.clone())),
        };
        match settled {
            Some(settlement) => {
                scope.enqueue_microtask(move |scope| callback(scope, settlement));
            }
            None => self.callbacks.lock().push(Box::new(callback)),
        }
    }
}

impl fmt::Debug for PromiseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock() {
            PromiseState::Pending => write!(f, "Promise {{ <pending> }}"),
            PromiseState::Fulfilled(v) => write!(f, "Promise {{ <fulfilled>: {v:?} }}"),
            PromiseState::Rejected(e) => write!(f, "Promise {{ <rejected>: {e:?} }}"),
        }
    }
}

/// Settles a promise from any thread by scheduling onto the owning isolate.
pub struct PromiseResolver {
    isolate: IsolateRef,
    promise: Arc<PromiseData>,
}

impl PromiseResolver {
    pub(crate) fn new(isolate: IsolateRef, promise: Arc<PromiseData>) -> Self {
        Self { isolate, promise }
    }

    /// Fulfills the promise. The value must be a primitive or belong to the
    /// promise's isolate.
    pub fn resolve(self, value: Value) {
        let promise = self.promise;
        let _ = self
            .isolate
            .schedule(move |scope| promise.settle(scope, Ok(value)));
    }

    /// Rejects the promise.
    pub fn reject(self, error: Value) {
        let promise = self.promise;
        let _ = self
            .isolate
            .schedule(move |scope| promise.settle(scope, Err(error)));
    }

    /// Settles directly; the caller must already be on the owning isolate.
    pub fn settle_in(self, scope: &mut Scope<'_>, settlement: Settlement) {
        debug_assert_eq!(scope.isolate_id(), self.isolate.id());
        self.promise.settle(scope, settlement);
    }
}
