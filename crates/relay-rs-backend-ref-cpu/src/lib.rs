//! Reference host implementation of the relay-rs device contract.
//!
//! Buffers live in host memory, the "stream" completes work eagerly, and a
//! loop-back communicator stands in for a multi-rank collective group. The
//! backend exists to pin down the semantics of the execution core and to
//! make its test suite runnable without device hardware.

pub mod cpu;

pub use cpu::{CpuBackend, CpuBuffer, CpuCommunicator, CpuStream};
