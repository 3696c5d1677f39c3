//! Process-wide isolate scheduler.
//!
//! The scheduler spawns one named worker thread per isolate. A worker pulls
//! tasks off its isolate's queue in submission order and drains the
//! microtask queue after each task. Disposal cancels still-queued tasks by
//! dropping their closures unrun; completions carried by those closures
//! resolve with a disposed error through their drop guards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::isolate::{Isolate, IsolateOptions, IsolateRef, IsolateShared, TaskFn};

/// Spawns and tracks isolates; joins their worker threads on shutdown.
pub struct Scheduler {
    isolates: Mutex<Vec<(IsolateRef, JoinHandle<()>)>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            isolates: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns a new isolate with its own worker thread.
    pub fn spawn(&self, options: IsolateOptions) -> Result<IsolateRef> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = options
            .name
            .unwrap_or_else(|| format!("islet-isolate-{id}"));
        let (tx, rx) = unbounded::<TaskFn>();
        let shared = Arc::new(IsolateShared {
            id,
            name: name.clone(),
            disposed: std::sync::atomic::AtomicBool::new(false),
        });
        let isolate_ref = IsolateRef::new(tx, shared.clone());
        let isolate = Isolate::new(shared, isolate_ref.clone());

        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || run_isolate(isolate, rx))
            .map_err(|e| Error::internal(format!("Failed to spawn isolate thread: {e}")))?;

        self.isolates.lock().push((isolate_ref.clone(), join));
        Ok(isolate_ref)
    }

    /// Disposes every isolate and joins their threads.
    pub fn shutdown(&self) {
        let isolates = std::mem::take(&mut *self.isolates.lock());
        for (isolate, _) in &isolates {
            isolate.dispose();
        }
        for (isolate, join) in isolates {
            if join.join().is_err() {
                warn!(isolate = %isolate.name(), "isolate worker panicked");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker loop: runs tasks until disposal or channel disconnect.
fn run_isolate(mut isolate: Isolate, rx: Receiver<TaskFn>) {
    let name = isolate.shared.name.clone();
    debug!(isolate = %name, "isolate worker starting");

    while let Ok(task) = rx.recv() {
        if isolate.shared.disposed.load(Ordering::SeqCst) {
            drop(task);
            break;
        }
        isolate.run_task(task);
    }

    // Cancel anything still queued. Dropping a task closure unrun is what
    // resolves its completion with a disposed error.
    isolate
        .shared
        .disposed
        .store(true, Ordering::SeqCst);
    let mut cancelled = 0usize;
    while let Ok(task) = rx.try_recv() {
        drop(task);
        cancelled += 1;
    }
    if cancelled > 0 {
        debug!(isolate = %name, cancelled, "cancelled queued tasks on dispose");
    }
    debug!(isolate = %name, "isolate worker stopped");
}
