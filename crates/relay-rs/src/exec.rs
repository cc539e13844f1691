//! Execution contexts and the queue executor.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::device::{DeviceBackend, DeviceError, DeviceId, DeviceResult};
use crate::task::Task;

/// Environment a task executes against: a backend, one device stream, and
/// optionally the communicator slot for collective operations.
///
/// Contexts are process-scoped, created once per device/communicator pairing
/// and reused across many tasks. The stream and communicator outlive every
/// task run against the context.
pub struct Context<B: DeviceBackend> {
    backend: Arc<B>,
    stream: B::Stream,
    communicator: Option<B::Communicator>,
    device: DeviceId,
}

impl<B: DeviceBackend> Context<B> {
    /// Builds a compute-only context with no communicator.
    pub fn new(backend: Arc<B>, stream: B::Stream, device: DeviceId) -> Self {
        Context {
            backend,
            stream,
            communicator: None,
            device,
        }
    }

    /// Builds a context that can also service collective operations.
    pub fn with_communicator(
        backend: Arc<B>,
        stream: B::Stream,
        device: DeviceId,
        communicator: B::Communicator,
    ) -> Self {
        Context {
            backend,
            stream,
            communicator: Some(communicator),
            device,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stream(&self) -> &B::Stream {
        &self.stream
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// The communicator slot, or an execution error for contexts that were
    /// built without one.
    pub fn communicator(&self) -> DeviceResult<&B::Communicator> {
        self.communicator
            .as_ref()
            .ok_or_else(|| DeviceError::execution("context has no communicator"))
    }
}

/// Single-worker queue executor owning one context.
///
/// Tasks submitted to an executor run in submission order on a dedicated
/// thread. The first task failure stops the worker: queued tasks are dropped
/// with their events unresolved, and the error surfaces from [`Executor::join`].
/// There is no per-task recovery; retrying a failed device or collective
/// call is unsafe without coordinated recovery across all participants.
pub struct Executor<B: DeviceBackend> {
    sender: Option<mpsc::Sender<Task<B>>>,
    worker: Option<thread::JoinHandle<DeviceResult<()>>>,
}

impl<B: DeviceBackend> Executor<B> {
    /// Spawns the worker thread around `context`.
    pub fn spawn(context: Context<B>) -> Self {
        let (sender, receiver) = mpsc::channel::<Task<B>>();
        let worker = thread::spawn(move || {
            for task in receiver {
                task.run(&context)?;
            }
            Ok(())
        });
        Executor {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Queues a task for execution on the worker thread.
    pub fn submit(&self, task: Task<B>) -> DeviceResult<()> {
        let name = task.name();
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| DeviceError::execution("executor already joined"))?;
        sender.send(task).map_err(|_| {
            DeviceError::execution(format!("executor stopped before task {name} was queued"))
        })
    }

    /// Closes the queue, waits for the worker to drain it, and returns the
    /// first task error if any occurred.
    pub fn join(mut self) -> DeviceResult<()> {
        drop(self.sender.take());
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| DeviceError::execution("executor worker panicked"))?,
            None => Ok(()),
        }
    }
}
