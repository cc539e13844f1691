//! Operation modules: builders that turn one mathematical effect into a
//! deferred [`Task`](crate::task::Task).
//!
//! Every operation follows the same construction pattern:
//!
//! 1. validate shape/dtype/device compatibility across its read and write
//!    sets, failing fast before anything else happens;
//! 2. snapshot the event currently gating each touched handle;
//! 3. build a closure that, when run against a context, guards on every
//!    snapshot (inputs first, then outputs), normalizes layouts and
//!    materializes placeholder outputs inside the guarded region, invokes
//!    the collaborator library on the context's stream, and synchronizes the
//!    stream before returning so the task's event only resolves once the
//!    effect is durably visible;
//! 4. install the task's output event on every written handle — the single
//!    point where a handle's event is overwritten.
//!
//! Because installation happens in construction order, a chain of writers to
//! one handle is serialized in program order with no explicit graph.

pub mod all_reduce;
pub mod linear;

use crate::device::{DeviceBackend, DeviceError, DeviceResult, TensorSpec};
use crate::exec::Context;
use crate::sync::EventGuard;
use crate::tensor::{Shape, TensorHandle};

/// Checks dtype and device agreement across an operation's handle set.
fn check_uniform<B: DeviceBackend>(
    op: &'static str,
    handles: &[&TensorHandle<B>],
) -> DeviceResult<()> {
    let mut iter = handles.iter();
    let Some(first) = iter.next() else {
        return Ok(());
    };
    for handle in iter {
        if handle.dtype() != first.dtype() {
            return Err(DeviceError::precondition(format!(
                "{op}: dtype mismatch ({:?} vs {:?})",
                handle.dtype(),
                first.dtype()
            )));
        }
        if handle.device() != first.device() {
            return Err(DeviceError::precondition(format!(
                "{op}: device mismatch ({:?} vs {:?})",
                handle.device(),
                first.device()
            )));
        }
    }
    Ok(())
}

/// Produces a densely packed buffer for a read operand, packing strided
/// views through the backend when the collaborator requires contiguity.
fn read_operand<B: DeviceBackend>(
    context: &Context<B>,
    handle: &TensorHandle<B>,
    receipt: &EventGuard,
    role: &'static str,
) -> DeviceResult<B::Buffer> {
    let buffer = handle.buffer(receipt).ok_or_else(|| {
        DeviceError::execution(format!("{role} tensor has no device buffer attached"))
    })?;
    if handle.is_contiguous() {
        return Ok(buffer);
    }
    context
        .backend()
        .pack_contiguous(context.stream(), &buffer, &handle.spec(), &handle.strides())
}

/// Materializes a write target to `shape` inside the guarded region.
///
/// Placeholders are allocated here (the resize-on-write case); strided
/// targets are re-packed to a dense buffer; already-dense targets are reused
/// as-is.
fn write_operand<B: DeviceBackend>(
    context: &Context<B>,
    handle: &TensorHandle<B>,
    receipt: &EventGuard,
    shape: &Shape,
) -> DeviceResult<B::Buffer> {
    let spec = TensorSpec::new(handle.dtype(), shape.clone());
    let Some(buffer) = handle.buffer(receipt) else {
        let buffer = context.backend().allocate(&spec)?;
        handle.set_materialized(receipt, buffer.clone(), shape.clone());
        return Ok(buffer);
    };
    if handle.is_contiguous() {
        return Ok(buffer);
    }
    let packed =
        context
            .backend()
            .pack_contiguous(context.stream(), &buffer, &spec, &handle.strides())?;
    handle.set_materialized(receipt, packed.clone(), shape.clone());
    Ok(packed)
}
