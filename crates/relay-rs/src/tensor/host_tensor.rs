//! Host-resident staging tensor used at the boundary with device backends.

use crate::device::{DeviceError, DeviceResult};

use super::{DType, Shape};

/// Densely packed host tensor holding f32 staging data.
///
/// This is the transfer format for uploads and readbacks only; device-side
/// representations are owned by the backend and may use any precision the
/// collaborator libraries support.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Shape,
    dtype: DType,
    data: Vec<f32>,
}

impl HostTensor {
    /// Wraps a dense row-major buffer, checking the element count.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> DeviceResult<Self> {
        if data.len() != shape.num_elements() {
            return Err(DeviceError::precondition(format!(
                "host tensor data length {} does not match shape {:?}",
                data.len(),
                shape.dims()
            )));
        }
        Ok(HostTensor {
            shape,
            dtype: DType::F32,
            data,
        })
    }

    /// Builds a zero-filled host tensor.
    pub fn zeros(shape: Shape) -> Self {
        let data = vec![0.0; shape.num_elements()];
        HostTensor {
            shape,
            dtype: DType::F32,
            data,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}
