//! Execution contexts.
//!
//! A context is a global object plus identity. Every isolate starts with a
//! default context; callbacks can be run against another context of the same
//! isolate via [`Scope::with_context`](crate::isolate::Scope::with_context).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::object::ObjectData;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ContextData {
    id: u64,
    global: Arc<ObjectData>,
}

/// A context handle. Cheap to clone; identity is by context id.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextData>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextData {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                global: ObjectData::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn global(&self) -> &Arc<ObjectData> {
        &self.inner.global
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({})", self.inner.id)
    }
}
