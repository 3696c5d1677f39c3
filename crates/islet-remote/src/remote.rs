//! Remote handles.
//!
//! A [`RemoteHandle`] names a payload that lives in one isolate and may be
//! held by any thread. Dereferencing requires proof of holding the owning
//! isolate's lock (a [`Scope`] of that isolate). Destruction never touches
//! the payload from a foreign thread: when the last co-owner drops, the
//! payload is shipped back to the owning isolate's queue to be dropped
//! there. If the owning isolate is already gone, the payload is abandoned
//! in place.

use std::sync::Arc;

use islet_vm::{Error, IsolateRef, Result, Scope};

/// An owning, isolate-tagged token for a payload in a specific isolate.
///
/// Clones co-own the payload; it stays alive while any clone does.
pub struct RemoteHandle<T: Send + Sync + 'static> {
    isolate: IsolateRef,
    payload: Option<Arc<T>>,
}

impl<T: Send + Sync + 'static> RemoteHandle<T> {
    /// Captures `payload` in the currently locked isolate.
    pub fn capture(scope: &Scope<'_>, payload: T) -> Self {
        Self {
            isolate: scope.isolate(),
            payload: Some(Arc::new(payload)),
        }
    }

    /// The isolate that owns the payload.
    pub fn isolate(&self) -> &IsolateRef {
        &self.isolate
    }

    /// Produces the payload for use under the current lock. Fails unless the
    /// scope belongs to the owning isolate.
    pub fn deref(&self, scope: &Scope<'_>) -> Result<T>
    where
        T: Clone,
    {
        if scope.isolate_id() != self.isolate.id() {
            return Err(Error::type_error(
                "Cannot dereference this from current isolate",
            ));
        }
        match &self.payload {
            Some(payload) => Ok((**payload).clone()),
            None => Err(Error::internal("Remote handle payload already dropped")),
        }
    }

    /// Gives up this co-ownership. The last co-owner to release schedules a
    /// disposal task on the owning isolate rather than touching the payload
    /// here.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: Send + Sync + 'static> Clone for RemoteHandle<T> {
    fn clone(&self) -> Self {
        Self {
            isolate: self.isolate.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for RemoteHandle<T> {
    fn drop(&mut self) {
        let Some(payload) = self.payload.take() else {
            return;
        };
        // Only the last co-owner ships the payload home; if the owning
        // isolate is disposed, the payload is dropped where it stands.
        if let Some(payload) = Arc::into_inner(payload) {
            let _ = self.isolate.schedule(move |_scope| drop(payload));
        }
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for RemoteHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteHandle(isolate {})", self.isolate.id())
    }
}
