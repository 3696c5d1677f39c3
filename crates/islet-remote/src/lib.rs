//! islet-remote - cross-isolate references and invocation for islet.
//!
//! Lets code running in one isolate observe, copy, read, write, and invoke
//! values that live in another isolate, without either isolate being
//! corrupted or blocked indefinitely.
//!
//! # Building blocks
//!
//! - [`RemoteHandle`]: an owning, isolate-tagged token for a value in a
//!   specific isolate. Dereferencing requires the owning isolate's lock;
//!   destruction is deferred to the owning isolate's queue.
//! - [`Transferable`]: a value in motion between isolates, crossing by deep
//!   copy, by reference, as a one-shot dereference, or by sharing an
//!   engine-native allocation.
//! - The three-phase task driver: marshal out on the caller, execute on the
//!   target, marshal in back on the caller, in async, sync, ignored, or
//!   sync-promise mode.
//! - [`Reference`]: the user-visible handle exposing `typeof`, `deref`,
//!   `derefInto`, `release`, `copy`, `get`, `set`, and the `apply` family.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use islet_remote::{ApplyOptions, Reference};
//! use islet_vm::{IsolateOptions, Scheduler, Value};
//!
//! let scheduler = Scheduler::new();
//! let a = scheduler.spawn(IsolateOptions::default()).unwrap();
//! let b = scheduler.spawn(IsolateOptions::default()).unwrap();
//!
//! // Capture a function in isolate A.
//! let reference = a
//!     .run(|scope| {
//!         let f = Value::function("add", |_scope, _this, args| {
//!             let total: f64 = args.iter().filter_map(Value::as_number).sum();
//!             Ok(Value::number(total))
//!         });
//!         Ok(Arc::new(Reference::new(scope, f)))
//!     })
//!     .unwrap();
//!
//! // Invoke it synchronously from isolate B.
//! let sum = b
//!     .run(move |scope| {
//!         let args = Value::array(vec![Value::number(1.0), Value::number(2.0)]);
//!         reference.apply_sync(scope, None, Some(&args), &ApplyOptions::default())
//!     })
//!     .unwrap();
//! assert_eq!(sum.as_number(), Some(3.0));
//! scheduler.shutdown();
//! ```

pub mod apply;
pub mod dereference;
pub mod reference;
pub mod remote;
mod task;
mod timeout;
pub mod transfer;

pub use apply::ApplyOptions;
pub use dereference::DereferenceHandle;
pub use reference::{DerefOptions, Reference};
pub use remote::RemoteHandle;
pub use transfer::{
    ExternShared, ReferenceParts, Transferable, TransferOptions, TransferPosition, transfer_out,
};
