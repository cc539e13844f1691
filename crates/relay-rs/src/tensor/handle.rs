use std::fmt;
use std::sync::{Arc, Mutex};

use crate::device::{DeviceBackend, DeviceError, DeviceId, DeviceResult, TensorSpec};
use crate::sync::{Event, EventGuard};

use super::{DType, Shape};

struct TensorState<B: DeviceBackend> {
    buffer: Option<B::Buffer>,
    shape: Shape,
    strides: Vec<usize>,
}

struct Inner<B: DeviceBackend> {
    device: DeviceId,
    dtype: DType,
    state: Mutex<TensorState<B>>,
    /// The event gating this tensor's data: the completion token of the last
    /// scheduled task that writes it. Overwritten once per writing task, and
    /// only through [`TensorHandle::install_event`].
    event: Mutex<Option<Arc<Event>>>,
}

/// Shared handle over one region of device memory plus its metadata and the
/// event gating its data.
///
/// Handles are cheap to clone and freely shared across tasks; the underlying
/// device buffer's lifetime is the backend's (ultimately the caller's)
/// responsibility. There is no internal locking of the data itself: the only
/// mutual-exclusion mechanism is event-gated ordering. Two tasks writing the
/// same handle without one capturing the other's event is a caller error the
/// core does not detect.
///
/// Reading or writing the buffer requires an [`EventGuard`] receipt, making
/// the wait-before-touch discipline visible in every accessor signature.
pub struct TensorHandle<B: DeviceBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: DeviceBackend> Clone for TensorHandle<B> {
    fn clone(&self) -> Self {
        TensorHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: DeviceBackend> TensorHandle<B> {
    /// Wraps an existing densely packed device buffer with explicit metadata.
    pub fn from_buffer(device: DeviceId, dtype: DType, shape: Shape, buffer: B::Buffer) -> Self {
        let strides = shape.contiguous_strides();
        TensorHandle {
            inner: Arc::new(Inner {
                device,
                dtype,
                state: Mutex::new(TensorState {
                    buffer: Some(buffer),
                    shape,
                    strides,
                }),
                event: Mutex::new(None),
            }),
        }
    }

    /// Wraps a strided view over a device buffer.
    ///
    /// `strides` are element strides, one per axis of `shape`.
    pub fn from_strided(
        device: DeviceId,
        dtype: DType,
        shape: Shape,
        strides: Vec<usize>,
        buffer: B::Buffer,
    ) -> DeviceResult<Self> {
        if strides.len() != shape.rank() {
            return Err(DeviceError::precondition(format!(
                "stride rank {} does not match shape rank {}",
                strides.len(),
                shape.rank()
            )));
        }
        Ok(TensorHandle {
            inner: Arc::new(Inner {
                device,
                dtype,
                state: Mutex::new(TensorState {
                    buffer: Some(buffer),
                    shape,
                    strides,
                }),
                event: Mutex::new(None),
            }),
        })
    }

    /// Creates a zero-sized placeholder with no device buffer.
    ///
    /// Placeholders are legal write targets: the task that writes one
    /// allocates it to the expected output shape inside its guarded region.
    pub fn unallocated(device: DeviceId, dtype: DType) -> Self {
        TensorHandle {
            inner: Arc::new(Inner {
                device,
                dtype,
                state: Mutex::new(TensorState {
                    buffer: None,
                    shape: Shape::new([0]),
                    strides: vec![1],
                }),
                event: Mutex::new(None),
            }),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.inner.device
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Snapshot of the current logical shape.
    pub fn shape(&self) -> Shape {
        self.lock_state().shape.clone()
    }

    /// Snapshot of the current element strides.
    pub fn strides(&self) -> Vec<usize> {
        self.lock_state().strides.clone()
    }

    /// Whether a device buffer is attached yet.
    pub fn is_materialized(&self) -> bool {
        self.lock_state().buffer.is_some()
    }

    /// Whether the current view is densely packed in row-major order.
    pub fn is_contiguous(&self) -> bool {
        let state = self.lock_state();
        state.strides == state.shape.contiguous_strides()
    }

    /// Interprets the shape as a `(rows, cols)` matrix.
    pub fn matrix_dims(&self) -> DeviceResult<(usize, usize)> {
        let state = self.lock_state();
        match state.shape.dims() {
            &[rows, cols] => Ok((rows, cols)),
            dims => Err(DeviceError::precondition(format!(
                "expected a rank-2 tensor, got shape {dims:?}"
            ))),
        }
    }

    /// Backend metadata for the current shape.
    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.inner.dtype, self.shape())
    }

    /// Snapshot of the event currently gating this tensor's data.
    ///
    /// Tasks capture this at construction time; the snapshot fixes the
    /// dependency the task waits on even if a later writer overwrites the
    /// handle's event afterwards.
    pub fn current_event(&self) -> Option<Arc<Event>> {
        self.inner
            .event
            .lock()
            .expect("tensor event mutex poisoned")
            .clone()
    }

    /// Installs the completion event of a newly constructed writing task.
    ///
    /// This is the single mutation point for the event field. Installation
    /// order equals the construction order of the writers, which in turn
    /// equals their effective execution order.
    pub(crate) fn install_event(&self, event: Arc<Event>) {
        *self
            .inner
            .event
            .lock()
            .expect("tensor event mutex poisoned") = Some(event);
    }

    /// Returns the device buffer, demanding a wait receipt.
    pub fn buffer(&self, _receipt: &EventGuard) -> Option<B::Buffer> {
        self.lock_state().buffer.clone()
    }

    /// Attaches (or replaces) the device buffer under a guarded region,
    /// updating shape metadata to the densely packed layout.
    ///
    /// Used for resize-on-write and contiguous re-materialization; never
    /// visible half-done to a reader that respects the wait discipline.
    pub(crate) fn set_materialized(&self, _receipt: &EventGuard, buffer: B::Buffer, shape: Shape) {
        let mut state = self.lock_state();
        state.strides = shape.contiguous_strides();
        state.shape = shape;
        state.buffer = Some(buffer);
    }

    /// Sets the logical shape of a not-yet-materialized placeholder.
    ///
    /// Called on the constructing thread so that operations built later
    /// against this handle can validate against the output shape before the
    /// producing task has run.
    pub(crate) fn set_shape(&self, shape: Shape) {
        let mut state = self.lock_state();
        state.strides = shape.contiguous_strides();
        state.shape = shape;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TensorState<B>> {
        self.inner
            .state
            .lock()
            .expect("tensor state mutex poisoned")
    }
}

impl<B: DeviceBackend> fmt::Debug for TensorHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("TensorHandle")
            .field("device", &self.inner.device)
            .field("dtype", &self.inner.dtype)
            .field("shape", &state.shape.dims())
            .field("materialized", &state.buffer.is_some())
            .finish()
    }
}
