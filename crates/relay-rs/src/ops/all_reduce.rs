//! All-reduce across the peers of a communicator.
//!
//! Unlike the compute primitives, a collective call may read stale memory in
//! any buffer it touches (the receive buffer can be used as scratch), so the
//! task guards every captured event and installs its output event on the
//! send handle as well as the receive handle.

use crate::device::{DeviceBackend, DeviceError, DeviceResult, ReduceOp};
use crate::exec::Context;
use crate::sync::EventGuard;
use crate::task::Task;
use crate::tensor::TensorHandle;

use super::{check_uniform, read_operand, write_operand};

/// Schedules the out-of-place variant: `receive = reduce(send)` across the
/// communicator's peers.
///
/// A materialized `receive` must agree with `send` on shape; a placeholder
/// `receive` adopts `send`'s shape and is allocated inside the task.
pub fn run<B: DeviceBackend>(
    receive: &TensorHandle<B>,
    send: &TensorHandle<B>,
    op: ReduceOp,
) -> DeviceResult<Task<B>> {
    ensure_supported(op)?;
    check_uniform("all_reduce::run", &[receive, send])?;
    let shape = send.shape();
    if receive.is_materialized() {
        if receive.shape() != shape {
            return Err(DeviceError::precondition(format!(
                "all_reduce::run: receive shape {:?} does not match send shape {:?}",
                receive.shape().dims(),
                shape.dims()
            )));
        }
    } else {
        receive.set_shape(shape.clone());
    }

    let send_event = send.current_event();
    let receive_event = receive.current_event();
    let dtype = send.dtype();
    let count = shape.num_elements();
    let send_handle = send.clone();
    let receive_handle = receive.clone();

    let task = Task::new(
        "all_reduce::run",
        Box::new(move |context: &Context<B>| {
            let send_guard = EventGuard::wait(send_event.as_ref());
            let receive_guard = EventGuard::wait(receive_event.as_ref());
            let send_buffer = read_operand(context, &send_handle, &send_guard, "send")?;
            let receive_buffer = write_operand(context, &receive_handle, &receive_guard, &shape)?;
            let communicator = context.communicator()?;
            context.backend().all_reduce(
                communicator,
                context.stream(),
                &send_buffer,
                &receive_buffer,
                count,
                dtype,
                op,
            )?;
            context.backend().synchronize(context.stream())
        }),
    );
    // The collective reads `send` too; serializing later writers of either
    // buffer behind this task keeps both sides race-free.
    send.install_event(task.event());
    receive.install_event(task.event());
    Ok(task)
}

/// Schedules the in-place variant: `tensor = reduce(tensor)` across the
/// communicator's peers.
pub fn run_inplace<B: DeviceBackend>(
    tensor: &TensorHandle<B>,
    op: ReduceOp,
) -> DeviceResult<Task<B>> {
    ensure_supported(op)?;
    let shape = tensor.shape();
    let dtype = tensor.dtype();
    let count = shape.num_elements();
    let event = tensor.current_event();
    let handle = tensor.clone();

    let task = Task::new(
        "all_reduce::run_inplace",
        Box::new(move |context: &Context<B>| {
            let guard = EventGuard::wait(event.as_ref());
            let buffer = write_operand(context, &handle, &guard, &shape)?;
            let communicator = context.communicator()?;
            context.backend().all_reduce(
                communicator,
                context.stream(),
                &buffer,
                &buffer,
                count,
                dtype,
                op,
            )?;
            context.backend().synchronize(context.stream())
        }),
    );
    tensor.install_event(task.event());
    Ok(task)
}

/// Rejects operators without a collective mapping before any event is
/// snapshotted or installed, so a failed construction leaves every handle
/// untouched.
fn ensure_supported(op: ReduceOp) -> DeviceResult<()> {
    match op {
        ReduceOp::Sum => Ok(()),
        other => Err(DeviceError::unsupported(
            "all-reduce operation",
            format!("{other:?} has no collective mapping"),
        )),
    }
}
