//! One-shot dereference handles.
//!
//! `derefInto()` yields a handle whose transfer-out is single use: it hands
//! its remote handle to exactly one transferable, which in turn materializes
//! the live value only when it arrives back in its home isolate. The
//! single-use check lives here rather than on the reference, because the
//! reference may be released while the handle is still waiting to be
//! consumed.

use parking_lot::Mutex;

use islet_vm::{Error, Result, Value};

use crate::remote::RemoteHandle;
use crate::transfer::Transferable;

/// A transferable producer that re-materializes a referenced value on
/// arrival in its home isolate.
pub struct DereferenceHandle {
    inner: Mutex<Option<RemoteHandle<Value>>>,
}

impl DereferenceHandle {
    pub(crate) fn new(handle: RemoteHandle<Value>) -> Self {
        Self {
            inner: Mutex::new(Some(handle)),
        }
    }

    /// Hands the remote handle to a transferable. The second call fails.
    pub(crate) fn transfer_out(&self) -> Result<Transferable> {
        match self.inner.lock().take() {
            Some(handle) => Ok(Transferable::Deref(handle)),
            None => Err(Error::generic(
                "The return value of `derefInto()` should only be used once",
            )),
        }
    }
}

impl std::fmt::Debug for DereferenceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let consumed = self.inner.lock().is_none();
        write!(f, "DereferenceHandle(consumed: {consumed})")
    }
}
