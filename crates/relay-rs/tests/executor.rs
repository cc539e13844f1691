use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use relay_rs::ops;
use relay_rs::sync::EventGuard;
use relay_rs::{
    Context, DType, DeviceBackend, DeviceError, DeviceId, Executor, GemmPrecision, HostTensor,
    ReduceOp, Shape, TensorHandle,
};
use relay_rs_backend_ref_cpu::{CpuBackend, CpuStream};

const DEVICE: DeviceId = DeviceId(0);

fn device_tensor(
    backend: &CpuBackend,
    dims: &[usize],
    data: &[f32],
) -> Result<TensorHandle<CpuBackend>> {
    let shape = Shape::new(dims.to_vec());
    let host = HostTensor::from_vec(shape.clone(), data.to_vec())?;
    let buffer = backend.upload(&host)?;
    Ok(TensorHandle::from_buffer(DEVICE, DType::F32, shape, buffer))
}

fn read_back(backend: &CpuBackend, handle: &TensorHandle<CpuBackend>) -> Result<Vec<f32>> {
    let receipt = EventGuard::wait(handle.current_event().as_ref());
    let buffer = handle
        .buffer(&receipt)
        .ok_or_else(|| anyhow!("tensor has no buffer"))?;
    Ok(backend.download(&buffer, &handle.spec())?.into_data())
}

/// A task built after another writer of the same tensor must wait for that
/// writer even when it reaches a different executor first.
#[test]
fn later_writer_waits_for_earlier_writer_across_executors() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let identity = device_tensor(&backend, &[2, 2], &[1.0, 0.0, 0.0, 1.0])?;
    let x1 = device_tensor(&backend, &[2, 2], &[1.0; 4])?;
    let x2 = device_tensor(&backend, &[2, 2], &[2.0; 4])?;
    let y = TensorHandle::unallocated(DEVICE, DType::F32);

    let first = ops::linear::forward(&y, &x1, &identity, GemmPrecision::F32)?;
    let second = ops::linear::forward(&y, &x2, &identity, GemmPrecision::F32)?;
    let second_event = second.event();

    // The later writer reaches a worker first, but its guard holds it until
    // the earlier writer's event resolves.
    let late = Executor::spawn(Context::new(Arc::clone(&backend), CpuStream, DEVICE));
    late.submit(second)?;
    thread::sleep(Duration::from_millis(100));
    assert!(!second_event.is_signaled(), "second writer ran too early");

    let local = Context::new(Arc::clone(&backend), CpuStream, DEVICE);
    first.run(&local)?;
    late.join()?;

    assert!(second_event.is_signaled());
    assert_eq!(read_back(&backend, &y)?, vec![2.0; 4]);
    Ok(())
}

/// Readers block on the tensor's current event, not on executor internals.
#[test]
fn reader_blocks_until_the_writer_signals() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let x = device_tensor(&backend, &[2, 2], &[3.0; 4])?;
    let identity = device_tensor(&backend, &[2, 2], &[1.0, 0.0, 0.0, 1.0])?;
    let y = TensorHandle::unallocated(DEVICE, DType::F32);

    let task = ops::linear::forward(&y, &x, &identity, GemmPrecision::F32)?;

    let reader_backend = Arc::clone(&backend);
    let reader_handle = y.clone();
    let reader = thread::spawn(move || read_back(&reader_backend, &reader_handle));

    thread::sleep(Duration::from_millis(50));
    assert!(!reader.is_finished(), "reader must wait for the writer");

    let context = Context::new(Arc::clone(&backend), CpuStream, DEVICE);
    task.run(&context)?;

    let values = reader
        .join()
        .map_err(|_| anyhow!("reader panicked"))??;
    assert_eq!(values, vec![3.0; 4]);
    Ok(())
}

/// The first failure stops the worker: the failing task's event stays
/// unresolved, queued tasks are dropped, and the error surfaces from join.
#[test]
fn task_failure_aborts_the_executor() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    // A compute-only context cannot service collectives, so the first task
    // fails at execution time.
    let executor = Executor::spawn(Context::new(Arc::clone(&backend), CpuStream, DEVICE));

    let tensor = device_tensor(&backend, &[2], &[1.0, 2.0])?;
    let failing = ops::all_reduce::run_inplace(&tensor, ReduceOp::Sum)?;
    let failing_event = failing.event();
    executor.submit(failing)?;

    let x = device_tensor(&backend, &[2, 2], &[1.0; 4])?;
    let w = device_tensor(&backend, &[2, 2], &[1.0; 4])?;
    let z = TensorHandle::unallocated(DEVICE, DType::F32);
    let queued = ops::linear::forward(&z, &x, &w, GemmPrecision::F32)?;
    let queued_event = queued.event();
    // The worker may already have stopped; either way the task never runs.
    let _ = executor.submit(queued);

    let err = executor.join().expect_err("join must surface the failure");
    assert!(matches!(err, DeviceError::Execution { .. }));
    assert!(!failing_event.is_signaled());
    assert!(!queued_event.is_signaled());
    Ok(())
}

/// Submitting after join is a usage error, not a hang.
#[test]
fn submit_after_worker_stop_is_an_error() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let executor = Executor::spawn(Context::new(Arc::clone(&backend), CpuStream, DEVICE));

    let tensor = device_tensor(&backend, &[2], &[1.0, 2.0])?;
    let failing = ops::all_reduce::run_inplace(&tensor, ReduceOp::Sum)?;
    executor.submit(failing)?;

    // Wait for the worker to observe the failure and exit.
    thread::sleep(Duration::from_millis(100));

    let x = device_tensor(&backend, &[1, 1], &[1.0])?;
    let w = device_tensor(&backend, &[1, 1], &[1.0])?;
    let y = TensorHandle::unallocated(DEVICE, DType::F32);
    let task = ops::linear::forward(&y, &x, &w, GemmPrecision::F32)?;
    let err = executor
        .submit(task)
        .expect_err("stopped executor must reject submissions");
    assert!(matches!(err, DeviceError::Execution { .. }));

    assert!(executor.join().is_err());
    Ok(())
}
