//! Single-slot queue that serializes reconciliation passes.
//!
//! At most one pass runs at a time. A request that arrives while a pass is
//! running (from another thread, or reentrantly from inside the pass) does
//! not run; it marks the slot pending and the running pass goes around once
//! more when it finishes. Any number of overlapping requests collapse into a
//! single re-run.

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Slot {
    running: bool,
    pending: bool,
}

/// Coalescing reconciliation queue.
#[derive(Debug, Default)]
pub struct ReconcileQueue {
    slot: Mutex<Slot>,
}

/// Clears `running` if a pass panics. A normal exit releases the slot in
/// the same critical section that checks `pending`, and disarms the guard.
struct RunningGuard<'a> {
    slot: &'a Mutex<Slot>,
    armed: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.lock().running = false;
        }
    }
}

impl ReconcileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `pass`, or queue a re-run if one is already in progress.
    ///
    /// Returns the result of the final pass, or `None` if the request was
    /// folded into a running one.
    pub fn run<T>(&self, mut pass: impl FnMut() -> T) -> Option<T> {
        {
            let mut slot = self.slot.lock();
            if slot.running {
                slot.pending = true;
                return None;
            }
            slot.running = true;
            slot.pending = false;
        }
        let mut guard = RunningGuard {
            slot: &self.slot,
            armed: true,
        };

        loop {
            let result = pass();
            {
                let mut slot = self.slot.lock();
                if !slot.pending {
                    slot.running = false;
                    guard.armed = false;
                    return Some(result);
                }
                slot.pending = false;
            }
            log::debug!("Re-running reconciliation for coalesced requests");
        }
    }

    /// Whether a pass is currently running.
    pub fn is_running(&self) -> bool {
        self.slot.lock().running
    }
}
