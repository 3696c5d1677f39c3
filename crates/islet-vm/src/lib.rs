//! islet-vm - embedded script engine substrate for islet.
//!
//! Provides the per-isolate execution model the runtime layer builds on:
//! script values with `Arc`-shared heap payloads, insertion-ordered objects,
//! promises with microtask-deferred settlement, deep copies of JSON-like
//! values, and isolates driven by dedicated worker threads behind a
//! process-wide [`Scheduler`].
//!
//! # Threading model
//!
//! - An isolate's state is confined to its worker thread; holding a
//!   [`Scope`] is holding the isolate's lock.
//! - [`IsolateRef`] is the `Send + Sync` handle: it submits tasks, reads
//!   flags, and disposes, but never touches isolate state directly.
//! - Tasks from one submitter run in submission order; microtasks drain
//!   after every task.
//!
//! # Example
//!
//! ```no_run
//! use islet_vm::{IsolateOptions, Scheduler, Value};
//!
//! let scheduler = Scheduler::new();
//! let isolate = scheduler.spawn(IsolateOptions::default()).unwrap();
//! let doubled = isolate
//!     .run(|scope| {
//!         scope.global().set("x".into(), Value::number(21.0));
//!         Ok(42.0)
//!     })
//!     .unwrap();
//! assert_eq!(doubled, 42.0);
//! scheduler.shutdown();
//! ```

pub mod context;
pub mod copy;
pub mod error;
pub mod isolate;
pub mod object;
pub mod promise;
pub mod scheduler;
pub mod value;

pub use context::Context;
pub use copy::CopiedValue;
pub use error::{Error, Result};
pub use isolate::{IsolateOptions, IsolateRef, Scope};
pub use object::{ArrayData, ObjectData, PropertyKey};
pub use promise::{PromiseData, PromiseResolver, PromiseState, Settlement};
pub use scheduler::Scheduler;
pub use value::{ErrorValue, FunctionData, HostRef, NativeFn, SharedBytes, TypeTag, Value};
