//! Capability contracts expected from device collaborators.
//!
//! The execution core never talks to an accelerated-math or collective
//! library directly; it goes through the [`DeviceBackend`] trait, which a
//! concrete backend crate implements (see `relay-rs-backend-ref-cpu` for the
//! host reference implementation used in tests).

pub mod spec;

pub use spec::{
    DeviceBackend, DeviceError, DeviceId, DeviceResult, GemmArgs, GemmPrecision, ReduceOp,
    TensorSpec,
};
