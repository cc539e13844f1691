use std::sync::Arc;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relay_rs::ops;
use relay_rs::sync::EventGuard;
use relay_rs::{
    Context, DType, DeviceBackend, DeviceError, DeviceId, GemmPrecision, HostTensor, Shape,
    TensorHandle,
};
use relay_rs_backend_ref_cpu::{CpuBackend, CpuBuffer, CpuStream};

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

/// Host reference for `y = x . w^T` with `x (m x k)` and `w (n x k)`.
fn forward_reference(x: &[f32], w: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut y = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for p in 0..k {
                acc += x[i * k + p] * w[j * k + p];
            }
            y[i * n + j] = acc;
        }
    }
    y
}

fn assert_close(got: &[f32], want: &[f32]) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (index, (g, w)) in got.iter().zip(want).enumerate() {
        assert!(
            (g - w).abs() <= 1e-4 * (1.0 + w.abs()),
            "element {index}: got {g}, want {w}"
        );
    }
}

#[test]
fn forward_matches_host_reference() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let context = Context::new(Arc::clone(&backend), CpuStream, DEVICE);

    let x_data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let w_data = [
        0.5, -1.0, 2.0, 0.0, 1.5, 1.0, -0.5, 2.5, -2.0, 0.25, 1.0, -1.5,
    ];
    let x = device_tensor(&backend, &[2, 4], &x_data)?;
    let w = device_tensor(&backend, &[3, 4], &w_data)?;
    let y = TensorHandle::unallocated(DEVICE, DType::F32);

    let task = ops::linear::forward(&y, &x, &w, GemmPrecision::F32)?;
    task.run(&context)?;

    assert_eq!(y.shape().dims(), &[2, 3]);
    let got = read_back(&backend, &y)?;
    assert_close(&got, &forward_reference(&x_data, &w_data, 2, 3, 4));
    Ok(())
}

#[test]
fn gradients_match_host_reference() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let context = Context::new(Arc::clone(&backend), CpuStream, DEVICE);
    let mut rng = StdRng::seed_from_u64(7);

    let (m, n, k) = (4, 3, 5);
    let x_data: Vec<f32> = (0..m * k).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let w_data: Vec<f32> = (0..n * k).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let dy_data: Vec<f32> = (0..m * n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let x = device_tensor(&backend, &[m, k], &x_data)?;
    let w = device_tensor(&backend, &[n, k], &w_data)?;
    let dy = device_tensor(&backend, &[m, n], &dy_data)?;
    let dw = TensorHandle::unallocated(DEVICE, DType::F32);
    let dx = TensorHandle::unallocated(DEVICE, DType::F32);

    ops::linear::backward_weight(&dw, &dy, &x, GemmPrecision::F32)?.run(&context)?;
    ops::linear::backward_input(&dx, &dy, &w, GemmPrecision::F32)?.run(&context)?;

    // dw[j][p] = sum_i dy[i][j] * x[i][p]
    let mut dw_want = vec![0.0f32; n * k];
    for j in 0..n {
        for p in 0..k {
            for i in 0..m {
                dw_want[j * k + p] += dy_data[i * n + j] * x_data[i * k + p];
            }
        }
    }
    // dx[i][p] = sum_j dy[i][j] * w[j][p]
    let mut dx_want = vec![0.0f32; m * k];
    for i in 0..m {
        for p in 0..k {
            for j in 0..n {
                dx_want[i * k + p] += dy_data[i * n + j] * w_data[j * k + p];
            }
        }
    }

    assert_eq!(dw.shape().dims(), &[n, k]);
    assert_eq!(dx.shape().dims(), &[m, k]);
    assert_close(&read_back(&backend, &dw)?, &dw_want);
    assert_close(&read_back(&backend, &dx)?, &dx_want);
    Ok(())
}

#[test]
fn resize_on_write_allocates_under_the_task() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let context = Context::new(Arc::clone(&backend), CpuStream, DEVICE);

    let x = device_tensor(&backend, &[2, 4], &[1.0; 8])?;
    let w = device_tensor(&backend, &[3, 4], &[1.0; 12])?;
    let y = TensorHandle::unallocated(DEVICE, DType::F32);

    let task = ops::linear::forward(&y, &x, &w, GemmPrecision::F32)?;
    let output_event = task.event();

    // Construction fixes the logical shape and installs the output event,
    // but allocation only happens inside the guarded task body.
    assert_eq!(y.shape().dims(), &[2, 3]);
    assert!(!y.is_materialized());
    let installed = y.current_event().ok_or_else(|| anyhow!("missing event"))?;
    assert!(Arc::ptr_eq(&installed, &output_event));
    assert!(!output_event.is_signaled());

    task.run(&context)?;

    assert!(y.is_materialized());
    assert!(output_event.is_signaled());
    assert_eq!(read_back(&backend, &y)?, vec![4.0; 6]);
    Ok(())
}

#[test]
fn mismatched_inner_dimension_fails_fast() {
    let backend = CpuBackend::new();
    let x = device_tensor(&backend, &[2, 4], &[0.0; 8]).expect("x");
    let w = device_tensor(&backend, &[3, 5], &[0.0; 15]).expect("w");
    let y = TensorHandle::unallocated(DEVICE, DType::F32);

    let err = ops::linear::forward(&y, &x, &w, GemmPrecision::F32).expect_err("must fail");
    assert!(matches!(err, DeviceError::Precondition { .. }));
    assert!(y.current_event().is_none(), "no event may be installed");
}

#[test]
fn materialized_output_with_wrong_shape_fails_fast() {
    let backend = CpuBackend::new();
    let x = device_tensor(&backend, &[2, 4], &[0.0; 8]).expect("x");
    let w = device_tensor(&backend, &[3, 4], &[0.0; 12]).expect("w");
    let y = device_tensor(&backend, &[2, 2], &[0.0; 4]).expect("y");

    let err = ops::linear::forward(&y, &x, &w, GemmPrecision::F32).expect_err("must fail");
    assert!(matches!(err, DeviceError::Precondition { .. }));
    assert!(y.current_event().is_none());
}

#[test]
fn strided_input_is_packed_before_the_gemm() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let context = Context::new(Arc::clone(&backend), CpuStream, DEVICE);

    // 2x2 view over rows of width 3: picks columns 0..2 of each row.
    let raw = CpuBuffer::from_vec(vec![1.0, 2.0, 9.0, 3.0, 4.0, 9.0]);
    let x = TensorHandle::<CpuBackend>::from_strided(
        DEVICE,
        DType::F32,
        Shape::new([2, 2]),
        vec![3, 1],
        raw,
    )?;
    let w = device_tensor(&backend, &[2, 2], &[1.0, 0.0, 0.0, 1.0])?;
    let y = TensorHandle::unallocated(DEVICE, DType::F32);

    ops::linear::forward(&y, &x, &w, GemmPrecision::F32)?.run(&context)?;
    // w is the identity, so y is the packed view of x.
    assert_eq!(read_back(&backend, &y)?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn chained_writes_serialize_in_construction_order() -> Result<()> {
    let backend = Arc::new(CpuBackend::new());
    let context = Context::new(Arc::clone(&backend), CpuStream, DEVICE);

    let w = device_tensor(&backend, &[2, 2], &[1.0, 0.0, 0.0, 1.0])?;
    let y = TensorHandle::unallocated(DEVICE, DType::F32);

    let mut tasks = Vec::new();
    for round in 0..4 {
        let fill = (round + 1) as f32;
        let x = device_tensor(&backend, &[2, 2], &[fill; 4])?;
        tasks.push(ops::linear::forward(&y, &x, &w, GemmPrecision::F32)?);
    }
    for task in tasks {
        task.run(&context)?;
    }
    // Last writer wins.
    assert_eq!(read_back(&backend, &y)?, vec![4.0; 4]);
    Ok(())
}
