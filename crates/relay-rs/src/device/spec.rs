use thiserror::Error;

use crate::tensor::{DType, HostTensor, Shape};

/// Identifies the device a tensor lives on and a context executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

/// Tensor metadata coupling dtype and shape, as passed across the backend
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        TensorSpec { dtype, shape }
    }
}

/// Compute-precision selector forwarded opaquely to the accelerated-math
/// collaborator. Backends that do not distinguish modes may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmPrecision {
    F32,
    Tf32,
    F16,
}

/// Reduction operator for collective operations.
///
/// The enumeration is closed; backends map each variant onto their collective
/// library's corresponding primitive and fail fast on anything they cannot
/// service, rather than silently defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

/// Error surfaced by the execution core and its device collaborators.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Shape/dtype/device mismatch detected synchronously at task
    /// construction, before any device call.
    #[error("precondition violation: {message}")]
    Precondition { message: String },
    /// A requested operator, element type, or placement the collaborator
    /// library cannot service.
    #[error("{what} is not supported: {reason}")]
    Unsupported { what: &'static str, reason: String },
    /// The collaborator call itself reported failure. Never retried.
    #[error("device execution failure: {message}")]
    Execution { message: String },
}

impl DeviceError {
    pub fn precondition(message: impl Into<String>) -> Self {
        DeviceError::Precondition {
            message: message.into(),
        }
    }

    pub fn unsupported(what: &'static str, reason: impl Into<String>) -> Self {
        DeviceError::Unsupported {
            what,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        DeviceError::Execution {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by device routines.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Operand description for a dense matrix multiply.
///
/// Semantics: `out (m x n) = A . B` where `A` is `lhs` stored row-major as
/// `(m x k)`, or as `(k x m)` used transposed when `lhs_transposed` is set;
/// `B` is `rhs` stored `(k x n)`, or `(n x k)` used transposed when
/// `rhs_transposed` is set. All buffers are densely packed.
pub struct GemmArgs<'a, B: DeviceBackend + ?Sized> {
    pub lhs: &'a B::Buffer,
    pub rhs: &'a B::Buffer,
    pub out: &'a B::Buffer,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lhs_transposed: bool,
    pub rhs_transposed: bool,
    pub dtype: DType,
    pub precision: GemmPrecision,
}

/// Contract a concrete device implementation exposes to the execution core.
///
/// `Buffer` is a cheaply clonable reference to device memory whose lifetime
/// is managed outside the core. `Stream` orders device work; `synchronize`
/// must not return until every operation previously issued on the stream is
/// durably visible. `Communicator` identifies this device's slot in a
/// collective group and must outlive every task run against it.
pub trait DeviceBackend: Send + Sync + 'static {
    type Buffer: Clone + Send + Sync + 'static;
    type Stream: Send + Sync + 'static;
    type Communicator: Send + Sync + 'static;

    /// Returns a human-readable backend identifier (e.g. `"ref-cpu"`).
    fn backend_name(&self) -> &str;

    /// Allocates an uninitialized (or zeroed) device buffer for `spec`.
    fn allocate(&self, spec: &TensorSpec) -> DeviceResult<Self::Buffer>;

    /// Transfers a host staging tensor into device memory.
    fn upload(&self, tensor: &HostTensor) -> DeviceResult<Self::Buffer>;

    /// Reads a densely packed device buffer back into host memory.
    fn download(&self, buffer: &Self::Buffer, spec: &TensorSpec) -> DeviceResult<HostTensor>;

    /// Materializes a densely packed copy of a strided buffer.
    ///
    /// `strides` are element strides matching `spec.shape`; the returned
    /// buffer is row-major contiguous. This is itself a device operation
    /// issued on `stream` and may allocate.
    fn pack_contiguous(
        &self,
        stream: &Self::Stream,
        buffer: &Self::Buffer,
        spec: &TensorSpec,
        strides: &[usize],
    ) -> DeviceResult<Self::Buffer>;

    /// Blocks until all work previously issued on `stream` has completed.
    fn synchronize(&self, stream: &Self::Stream) -> DeviceResult<()>;

    /// Dense matrix multiply on `stream`; see [`GemmArgs`] for semantics.
    fn gemm(&self, stream: &Self::Stream, args: GemmArgs<'_, Self>) -> DeviceResult<()>;

    /// Collective all-reduce across the communicator's peers on `stream`.
    ///
    /// Reduces `count` elements of `send` with the peers' contributions and
    /// writes the result to `recv` on every rank. `send` and `recv` may
    /// alias for in-place operation. Unsupported dtypes or operators fail
    /// fast.
    #[allow(clippy::too_many_arguments)]
    fn all_reduce(
        &self,
        communicator: &Self::Communicator,
        stream: &Self::Stream,
        send: &Self::Buffer,
        recv: &Self::Buffer,
        count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> DeviceResult<()>;
}
