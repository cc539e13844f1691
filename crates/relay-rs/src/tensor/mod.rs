//! Tensor metadata and the event-gated device tensor handle.
//!
//! The tensor module defines portable shapes, dtypes, the host staging
//! tensor used at the backend boundary, and [`TensorHandle`], the shared
//! view over device memory whose data is gated by the completion event of
//! its last scheduled writer.

pub mod dtype;
mod handle;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use handle::TensorHandle;
pub use host_tensor::HostTensor;
pub use shape::Shape;
