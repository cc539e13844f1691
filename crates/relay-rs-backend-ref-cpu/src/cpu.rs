use std::sync::{Arc, Condvar, Mutex, RwLock};

use relay_rs::device::{
    DeviceBackend, DeviceError, DeviceResult, GemmArgs, ReduceOp, TensorSpec,
};
use relay_rs::tensor::{DType, HostTensor};

/// Host-memory stand-in for a device buffer.
///
/// Cloning is cheap and shares the underlying storage, matching the aliasing
/// semantics of raw device pointers.
#[derive(Clone, Debug)]
pub struct CpuBuffer {
    data: Arc<RwLock<Vec<f32>>>,
}

impl CpuBuffer {
    pub fn from_vec(data: Vec<f32>) -> Self {
        CpuBuffer {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Copies the buffer contents out for inspection.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.read().expect("cpu buffer lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.data.read().expect("cpu buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host execution is eager, so the stream carries no state; `synchronize`
/// has nothing left to wait for by the time it is called.
pub struct CpuStream;

/// Reference backend computing everything in f32 host arithmetic.
///
/// Every [`GemmPrecision`](relay_rs::GemmPrecision) selector is serviced at
/// f32; dtypes other than `F32` are rejected as unsupported.
#[derive(Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

fn require_f32(what: &'static str, dtype: DType) -> DeviceResult<()> {
    if dtype == DType::F32 {
        Ok(())
    } else {
        Err(DeviceError::unsupported(
            what,
            format!("{dtype:?} is not supported by the reference cpu backend"),
        ))
    }
}

impl DeviceBackend for CpuBackend {
    type Buffer = CpuBuffer;
    type Stream = CpuStream;
    type Communicator = CpuCommunicator;

    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn allocate(&self, spec: &TensorSpec) -> DeviceResult<Self::Buffer> {
        require_f32("allocation dtype", spec.dtype)?;
        Ok(CpuBuffer::from_vec(vec![0.0; spec.shape.num_elements()]))
    }

    fn upload(&self, tensor: &HostTensor) -> DeviceResult<Self::Buffer> {
        require_f32("upload dtype", tensor.dtype())?;
        Ok(CpuBuffer::from_vec(tensor.data().to_vec()))
    }

    fn download(&self, buffer: &Self::Buffer, spec: &TensorSpec) -> DeviceResult<HostTensor> {
        require_f32("download dtype", spec.dtype)?;
        let data = buffer.to_vec();
        if data.len() != spec.shape.num_elements() {
            return Err(DeviceError::execution(format!(
                "buffer holds {} elements but spec {:?} expects {}",
                data.len(),
                spec.shape.dims(),
                spec.shape.num_elements()
            )));
        }
        HostTensor::from_vec(spec.shape.clone(), data)
    }

    fn pack_contiguous(
        &self,
        _stream: &Self::Stream,
        buffer: &Self::Buffer,
        spec: &TensorSpec,
        strides: &[usize],
    ) -> DeviceResult<Self::Buffer> {
        require_f32("pack dtype", spec.dtype)?;
        let dims = spec.shape.dims();
        if strides.len() != dims.len() {
            return Err(DeviceError::precondition(format!(
                "stride rank {} does not match shape rank {}",
                strides.len(),
                dims.len()
            )));
        }
        let source = buffer.data.read().expect("cpu buffer lock poisoned");
        let element_count = spec.shape.num_elements();
        let mut packed = Vec::with_capacity(element_count);
        let mut index = vec![0usize; dims.len()];
        for _ in 0..element_count {
            let offset: usize = index.iter().zip(strides).map(|(i, s)| i * s).sum();
            let value = source.get(offset).copied().ok_or_else(|| {
                DeviceError::execution(format!(
                    "strided view reads element {offset} past buffer of {}",
                    source.len()
                ))
            })?;
            packed.push(value);
            for axis in (0..dims.len()).rev() {
                index[axis] += 1;
                if index[axis] < dims[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Ok(CpuBuffer::from_vec(packed))
    }

    fn synchronize(&self, _stream: &Self::Stream) -> DeviceResult<()> {
        Ok(())
    }

    fn gemm(&self, _stream: &Self::Stream, args: GemmArgs<'_, Self>) -> DeviceResult<()> {
        require_f32("gemm dtype", args.dtype)?;
        let (m, n, k) = (args.m, args.n, args.k);
        // The output lock is exclusive, so an aliased operand would deadlock.
        if Arc::ptr_eq(&args.out.data, &args.lhs.data) || Arc::ptr_eq(&args.out.data, &args.rhs.data)
        {
            return Err(DeviceError::precondition(
                "gemm output must not alias an input buffer",
            ));
        }
        let lhs = args.lhs.data.read().expect("cpu buffer lock poisoned");
        let rhs = args.rhs.data.read().expect("cpu buffer lock poisoned");
        if lhs.len() != m * k || rhs.len() != n * k {
            return Err(DeviceError::precondition(format!(
                "gemm operand sizes {}x{} do not cover m={m} n={n} k={k}",
                lhs.len(),
                rhs.len()
            )));
        }
        let mut out = args.out.data.write().expect("cpu buffer lock poisoned");
        if out.len() != m * n {
            return Err(DeviceError::precondition(format!(
                "gemm output holds {} elements, expected {}",
                out.len(),
                m * n
            )));
        }
        let a = |i: usize, p: usize| {
            if args.lhs_transposed {
                lhs[p * m + i]
            } else {
                lhs[i * k + p]
            }
        };
        let b = |p: usize, j: usize| {
            if args.rhs_transposed {
                rhs[j * k + p]
            } else {
                rhs[p * n + j]
            }
        };
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for p in 0..k {
                    acc += a(i, p) * b(p, j);
                }
                out[i * n + j] = acc;
            }
        }
        Ok(())
    }

    fn all_reduce(
        &self,
        communicator: &Self::Communicator,
        _stream: &Self::Stream,
        send: &Self::Buffer,
        recv: &Self::Buffer,
        count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> DeviceResult<()> {
        require_f32("all-reduce dtype", dtype)?;
        match op {
            ReduceOp::Sum => communicator.all_reduce_sum(send, recv, count),
            other => Err(DeviceError::unsupported(
                "all-reduce operation",
                format!("{other:?} has no reference implementation"),
            )),
        }
    }
}

struct Round {
    generation: u64,
    joined: usize,
    acc: Vec<f32>,
    result: Vec<f32>,
}

struct RingShared {
    world: usize,
    round: Mutex<Round>,
    cond: Condvar,
}

/// Loop-back communicator connecting `world` logical ranks inside one
/// process.
///
/// Each rank's `all_reduce_sum` contributes into a shared accumulator and
/// blocks until every rank of the current generation has contributed, then
/// copies the reduced vector into its own receive buffer — the same
/// rendezvous semantics a device collective exposes, minus the hardware.
pub struct CpuCommunicator {
    rank: usize,
    shared: Arc<RingShared>,
}

impl CpuCommunicator {
    /// Builds the communicator handles for a ring of `world` logical ranks.
    pub fn ring(world: usize) -> Vec<CpuCommunicator> {
        assert!(world > 0, "communicator needs at least one rank");
        let shared = Arc::new(RingShared {
            world,
            round: Mutex::new(Round {
                generation: 0,
                joined: 0,
                acc: Vec::new(),
                result: Vec::new(),
            }),
            cond: Condvar::new(),
        });
        (0..world)
            .map(|rank| CpuCommunicator {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.shared.world
    }

    fn all_reduce_sum(&self, send: &CpuBuffer, recv: &CpuBuffer, count: usize) -> DeviceResult<()> {
        // Copy the contribution out before joining the rendezvous so the
        // send buffer's lock is never held across the barrier wait.
        let contribution: Vec<f32> = {
            let data = send.data.read().expect("cpu buffer lock poisoned");
            if data.len() < count {
                return Err(DeviceError::precondition(format!(
                    "send buffer holds {} elements, all-reduce needs {count}",
                    data.len()
                )));
            }
            data[..count].to_vec()
        };

        let mut round = self.shared.round.lock().expect("communicator poisoned");
        let generation = round.generation;
        if round.joined == 0 {
            round.acc = contribution;
        } else {
            if round.acc.len() != count {
                return Err(DeviceError::precondition(format!(
                    "peers disagree on element count ({} vs {count})",
                    round.acc.len()
                )));
            }
            for (slot, value) in round.acc.iter_mut().zip(&contribution) {
                *slot += value;
            }
        }
        round.joined += 1;
        if round.joined == self.shared.world {
            round.result = std::mem::take(&mut round.acc);
            round.joined = 0;
            round.generation += 1;
            self.shared.cond.notify_all();
        } else {
            while round.generation == generation {
                round = self
                    .shared
                    .cond
                    .wait(round)
                    .expect("communicator poisoned");
            }
        }
        let result = round.result.clone();
        drop(round);

        let mut out = recv.data.write().expect("cpu buffer lock poisoned");
        if out.len() < count {
            return Err(DeviceError::precondition(format!(
                "receive buffer holds {} elements, all-reduce needs {count}",
                out.len()
            )));
        }
        out[..count].copy_from_slice(&result[..count]);
        Ok(())
    }
}
