//! Timeout watchdog.
//!
//! A single lazily started thread owns a deadline heap. Arming registers an
//! expiry closure; at the deadline the closure runs on the watchdog thread.
//! Expiry closures race completion through the task's `did_finish` flag, so
//! a timer that fires after its task completed is a no-op and never needs
//! to be disarmed.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, error};

struct Entry {
    deadline: Instant,
    seq: u64,
    fire: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so the BinaryHeap pops the earliest deadline first.
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

static SENDER: OnceLock<Sender<Entry>> = OnceLock::new();
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Schedules `fire` to run after `after` on the watchdog thread.
pub(crate) fn arm(after: Duration, fire: impl FnOnce() + Send + 'static) {
    let sender = SENDER.get_or_init(spawn_watchdog);
    let entry = Entry {
        deadline: Instant::now() + after,
        seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        fire: Box::new(fire),
    };
    if sender.send(entry).is_err() {
        error!("timeout watchdog is gone; timer dropped");
    }
}

fn spawn_watchdog() -> Sender<Entry> {
    let (tx, rx) = unbounded::<Entry>();
    let spawned = std::thread::Builder::new()
        .name("islet-timeout".to_string())
        .spawn(move || watchdog_loop(rx));
    if let Err(e) = spawned {
        error!(error = %e, "failed to spawn timeout watchdog");
    }
    tx
}

fn watchdog_loop(rx: Receiver<Entry>) {
    debug!("timeout watchdog started");
    let mut heap: BinaryHeap<Entry> = BinaryHeap::new();
    loop {
        // Fire everything that is due.
        let now = Instant::now();
        while heap.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = heap.pop() {
                (entry.fire)();
            }
        }
        match heap.peek() {
            Some(next) => {
                let wait = next.deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(entry) => heap.push(entry),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(entry) => heap.push(entry),
                Err(_) => break,
            },
        }
    }
    debug!("timeout watchdog stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn fires_after_deadline() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        arm(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(100));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn fires_in_deadline_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for (delay, label) in [(40u64, "b"), (10, "a"), (70, "c")] {
            let order = order.clone();
            arm(Duration::from_millis(delay), move || {
                order.lock().push(label);
            });
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }
}
