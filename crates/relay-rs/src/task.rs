//! Deferred units of device work.

use std::fmt;
use std::sync::Arc;

use crate::device::{DeviceBackend, DeviceResult};
use crate::exec::Context;
use crate::profiling;
use crate::sync::Event;

type TaskBody<B> = Box<dyn FnOnce(&Context<B>) -> DeviceResult<()> + Send + 'static>;

/// One deferred unit of device work.
///
/// A task closes over the tensor handles it touches together with a snapshot
/// of each handle's gating event taken at construction time, and owns the
/// output event it will resolve. Construction is cheap and synchronous; all
/// blocking (guard waits, the collaborator call, the stream sync) happens
/// inside [`Task::run`], which an execution context invokes immediately or
/// from a worker queue.
///
/// A task either fully resolves its event (the body returned `Ok`) or never
/// resolves it: on failure the error propagates to whatever invoked the task
/// and no partial-completion state is exposed.
pub struct Task<B: DeviceBackend> {
    name: &'static str,
    event: Arc<Event>,
    body: TaskBody<B>,
}

impl<B: DeviceBackend> Task<B> {
    pub(crate) fn new(name: &'static str, body: TaskBody<B>) -> Self {
        Task {
            name,
            event: Arc::new(Event::new()),
            body,
        }
    }

    /// The completion event this task resolves ("F_out" of the operation
    /// that built it). Shared with every tensor handle the task writes.
    pub fn event(&self) -> Arc<Event> {
        Arc::clone(&self.event)
    }

    /// Short static name of the operation, used for profiling scopes.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Executes the task body against `context` and, on success, resolves
    /// the output event.
    ///
    /// Consuming `self` releases every captured tensor handle once the body
    /// has run, breaking any retention cycle between task and handles.
    pub fn run(self, context: &Context<B>) -> DeviceResult<()> {
        let _scope = profiling::scope(self.name);
        (self.body)(context)?;
        self.event.signal();
        Ok(())
    }
}

impl<B: DeviceBackend> fmt::Debug for Task<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("resolved", &self.event.is_signaled())
            .finish()
    }
}
