//! Linear projection without bias: forward and both gradients.
//!
//! Pure one-shot tensor-algebra steps; no gradient-graph bookkeeping happens
//! here — composing these into an autodiff pass is the caller's
//! responsibility. The accumulation/compute precision is forwarded opaquely
//! to the accelerated-math collaborator.

use crate::device::{DeviceBackend, DeviceError, DeviceResult, GemmArgs, GemmPrecision};
use crate::exec::Context;
use crate::sync::EventGuard;
use crate::task::Task;
use crate::tensor::{Shape, TensorHandle};

use super::{check_uniform, read_operand, write_operand};

struct GemmPlan {
    m: usize,
    n: usize,
    k: usize,
    lhs_transposed: bool,
    rhs_transposed: bool,
}

/// Schedules `y = x . w^T` for `x` of shape `(m, k)` and `w` of shape
/// `(n, k)`, writing `y` of shape `(m, n)`.
pub fn forward<B: DeviceBackend>(
    y: &TensorHandle<B>,
    x: &TensorHandle<B>,
    w: &TensorHandle<B>,
    precision: GemmPrecision,
) -> DeviceResult<Task<B>> {
    let (m, k) = x.matrix_dims()?;
    let (n, k_w) = w.matrix_dims()?;
    if k != k_w {
        return Err(DeviceError::precondition(format!(
            "linear::forward: inner dimensions disagree (x is {:?}, w is {:?})",
            x.shape().dims(),
            w.shape().dims()
        )));
    }
    schedule_gemm(
        "linear::forward",
        y,
        x,
        w,
        GemmPlan {
            m,
            n,
            k,
            lhs_transposed: false,
            rhs_transposed: true,
        },
        precision,
    )
}

/// Schedules `dw = dy^T . x` for `dy` of shape `(m, n)` and `x` of shape
/// `(m, k)`, writing `dw` of shape `(n, k)`.
pub fn backward_weight<B: DeviceBackend>(
    dw: &TensorHandle<B>,
    dy: &TensorHandle<B>,
    x: &TensorHandle<B>,
    precision: GemmPrecision,
) -> DeviceResult<Task<B>> {
    let (m, n) = dy.matrix_dims()?;
    let (m_x, k) = x.matrix_dims()?;
    if m != m_x {
        return Err(DeviceError::precondition(format!(
            "linear::backward_weight: batch dimensions disagree (dy is {:?}, x is {:?})",
            dy.shape().dims(),
            x.shape().dims()
        )));
    }
    schedule_gemm(
        "linear::backward_weight",
        dw,
        dy,
        x,
        GemmPlan {
            m: n,
            n: k,
            k: m,
            lhs_transposed: true,
            rhs_transposed: false,
        },
        precision,
    )
}

/// Schedules `dx = dy . w` for `dy` of shape `(m, n)` and `w` of shape
/// `(n, k)`, writing `dx` of shape `(m, k)`.
pub fn backward_input<B: DeviceBackend>(
    dx: &TensorHandle<B>,
    dy: &TensorHandle<B>,
    w: &TensorHandle<B>,
    precision: GemmPrecision,
) -> DeviceResult<Task<B>> {
    let (m, n) = dy.matrix_dims()?;
    let (n_w, k) = w.matrix_dims()?;
    if n != n_w {
        return Err(DeviceError::precondition(format!(
            "linear::backward_input: feature dimensions disagree (dy is {:?}, w is {:?})",
            dy.shape().dims(),
            w.shape().dims()
        )));
    }
    schedule_gemm(
        "linear::backward_input",
        dx,
        dy,
        w,
        GemmPlan {
            m,
            n: k,
            k: n,
            lhs_transposed: false,
            rhs_transposed: false,
        },
        precision,
    )
}

fn schedule_gemm<B: DeviceBackend>(
    name: &'static str,
    out: &TensorHandle<B>,
    lhs: &TensorHandle<B>,
    rhs: &TensorHandle<B>,
    plan: GemmPlan,
    precision: GemmPrecision,
) -> DeviceResult<Task<B>> {
    check_uniform(name, &[out, lhs, rhs])?;
    let out_shape = Shape::new([plan.m, plan.n]);
    if out.is_materialized() {
        if out.shape() != out_shape {
            return Err(DeviceError::precondition(format!(
                "{name}: output shape {:?} does not match expected {:?}",
                out.shape().dims(),
                out_shape.dims()
            )));
        }
    } else {
        out.set_shape(out_shape.clone());
    }

    // Snapshot the gating events now; later writers may overwrite the
    // handles' event fields, but this task waits on exactly these.
    let lhs_event = lhs.current_event();
    let rhs_event = rhs.current_event();
    let out_event = out.current_event();

    let dtype = lhs.dtype();
    let lhs_handle = lhs.clone();
    let rhs_handle = rhs.clone();
    let out_handle = out.clone();

    let task = Task::new(
        name,
        Box::new(move |context: &Context<B>| {
            let lhs_guard = EventGuard::wait(lhs_event.as_ref());
            let rhs_guard = EventGuard::wait(rhs_event.as_ref());
            let out_guard = EventGuard::wait(out_event.as_ref());
            let lhs_buffer = read_operand(context, &lhs_handle, &lhs_guard, "lhs")?;
            let rhs_buffer = read_operand(context, &rhs_handle, &rhs_guard, "rhs")?;
            let out_buffer = write_operand(context, &out_handle, &out_guard, &out_shape)?;
            context.backend().gemm(
                context.stream(),
                GemmArgs {
                    lhs: &lhs_buffer,
                    rhs: &rhs_buffer,
                    out: &out_buffer,
                    m: plan.m,
                    n: plan.n,
                    k: plan.k,
                    lhs_transposed: plan.lhs_transposed,
                    rhs_transposed: plan.rhs_transposed,
                    dtype,
                    precision,
                },
            )?;
            context.backend().synchronize(context.stream())
        }),
    );
    out.install_event(task.event());
    Ok(task)
}
