//! Event-gated deferred execution core for device tensor runtimes.
//!
//! Independent producers schedule deferred device work (matrix multiplies,
//! collective reductions) while every consumer of a tensor observes a
//! data-race-free, correctly ordered view of it — with no centralized
//! scheduler and no explicit dependency graph. Each tensor handle carries
//! the completion [`Event`] of its last scheduled writer; operations
//! snapshot those events at construction time and build a [`Task`] whose
//! body waits on the snapshots before touching any memory. Installing the
//! task's own event on every written handle chains the next dependent
//! operation implicitly.
//!
//! Concrete device collaborators (an accelerated-math library, a collective
//! library) plug in through the [`DeviceBackend`] trait; see the
//! `relay-rs-backend-ref-cpu` crate for the host reference implementation.

pub mod device;
pub mod exec;
pub mod ops;
pub mod profiling;
pub mod sync;
pub mod task;
pub mod tensor;

pub use device::{
    DeviceBackend, DeviceError, DeviceId, DeviceResult, GemmArgs, GemmPrecision, ReduceOp,
    TensorSpec,
};
pub use exec::{Context, Executor};
pub use sync::{Event, EventGuard};
pub use task::Task;
pub use tensor::{DType, HostTensor, Shape, TensorHandle};
