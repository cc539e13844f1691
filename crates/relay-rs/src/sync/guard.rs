use std::sync::Arc;

use super::Event;

/// Scoped wait on an optional [`Event`], released on scope exit.
///
/// Acquisition blocks until the event resolves; an absent event means "no
/// prior producer, data already valid" and the wait is a no-op. The guard
/// keeps the waited event alive for its own lifetime and serves as the
/// proof-of-wait token that [`TensorHandle`](crate::tensor::TensorHandle)
/// data accessors require: holding a guard is the only way to reach a
/// handle's device buffer.
///
/// Release happens unconditionally on drop, including early-return and error
/// paths, so task bodies can acquire guards at entry without risking a stuck
/// execution context during cleanup.
pub struct EventGuard {
    waited: Option<Arc<Event>>,
}

impl EventGuard {
    /// Waits on `event` (no-op when `None`) and returns the receipt.
    pub fn wait(event: Option<&Arc<Event>>) -> EventGuard {
        if let Some(event) = event {
            event.wait();
        }
        EventGuard {
            waited: event.cloned(),
        }
    }

    /// Returns the event this guard synchronized on, if any.
    pub fn event(&self) -> Option<&Arc<Event>> {
        self.waited.as_ref()
    }
}
