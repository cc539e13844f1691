use std::sync::{Condvar, Mutex};

/// One-shot completion token for a single scheduled device operation.
///
/// Resolution is monotonic: once signaled an event stays signaled, and
/// signaling again is a no-op. Waiting on an already-signaled event returns
/// immediately. Events are shared via `Arc` between the task that resolves
/// them and every tensor handle (or caller) observing them; exactly one task
/// ever signals a given event.
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Event {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Marks the event resolved and wakes every waiter. Idempotent.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().expect("event mutex poisoned");
        if !*signaled {
            *signaled = true;
            self.cond.notify_all();
        }
    }

    /// Blocks the calling thread until the event resolves.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().expect("event mutex poisoned");
        while !*signaled {
            signaled = self.cond.wait(signaled).expect("event mutex poisoned");
        }
    }

    /// Returns whether the event has resolved without blocking.
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().expect("event mutex poisoned")
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}
