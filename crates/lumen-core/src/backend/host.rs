//! Host reference backend.
//!
//! Emulates a separate device address space in host RAM: buffers are only
//! reachable through handles and explicit copies, exactly as on a GPU.
//! Kernels run the host implementations from `lumen-kernels`, synchronously
//! and in submission order, so `synchronize` only has to surface faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lumen_kernels::{cpu_elementwise, cpu_reduce, KernelScalar};
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{BufferHandle, ComputeBackend, LaunchConfig};
use crate::argument::KernelArgument;
use crate::config::EngineConfig;
use crate::dtype::{DType, Element};
use crate::ops::descriptor::{KernelId, Routine};
use crate::{LumenError, Result};

/// Counters for every primitive the backend has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: u64,
    pub frees: u64,
    /// Frees of handles that were not live. Always a caller bug.
    pub invalid_frees: u64,
    pub host_to_device: u64,
    pub device_to_device: u64,
    pub device_to_host: u64,
    pub launches: u64,
    pub synchronizations: u64,
    pub live_bytes: usize,
    pub peak_bytes: usize,
}

/// Word-backed so element views of any catalog dtype are aligned.
struct Allocation {
    words: Vec<u64>,
    nbytes: usize,
}

impl Allocation {
    fn zeroed(nbytes: usize) -> Self {
        Self {
            words: vec![0u64; (nbytes + 7) / 8],
            nbytes,
        }
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.nbytes]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let nbytes = self.nbytes;
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..nbytes]
    }

    fn elements<T: KernelScalar>(&self) -> &[T] {
        let n = self.nbytes / std::mem::size_of::<T>();
        &bytemuck::cast_slice::<u64, T>(&self.words)[..n]
    }

    fn elements_mut<T: KernelScalar>(&mut self) -> &mut [T] {
        let n = self.nbytes / std::mem::size_of::<T>();
        &mut bytemuck::cast_slice_mut::<u64, T>(&mut self.words)[..n]
    }
}

#[derive(Default)]
struct HostState {
    allocations: HashMap<u64, Allocation>,
    stats: BackendStats,
    pending_fault: Option<String>,
}

impl HostState {
    fn get(&self, handle: BufferHandle) -> Option<&Allocation> {
        self.allocations.get(&handle.raw())
    }

    fn get_mut(&mut self, handle: BufferHandle) -> Option<&mut Allocation> {
        self.allocations.get_mut(&handle.raw())
    }

    fn take_fault(&mut self) -> Result<()> {
        match self.pending_fault.take() {
            Some(msg) => Err(LumenError::Launch(msg)),
            None => Ok(()),
        }
    }
}

/// Reference [`ComputeBackend`] executing the catalog on the host.
pub struct HostBackend {
    state: Mutex<HostState>,
    next_handle: AtomicU64,
    par_threshold: usize,
    memory_limit: Option<usize>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            next_handle: AtomicU64::new(1),
            par_threshold: config.par_threshold,
            memory_limit: config.memory_limit_bytes,
        }
    }

    pub fn stats(&self) -> BackendStats {
        self.state.lock().stats
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Record an asynchronous device fault. It is reported by the next
    /// synchronizing call (`synchronize` or a device-to-host copy).
    pub fn inject_fault(&self, message: impl Into<String>) {
        self.state.lock().pending_fault = Some(message.into());
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HostBackend")
            .field("live", &state.allocations.len())
            .field("live_bytes", &state.stats.live_bytes)
            .field("par_threshold", &self.par_threshold)
            .finish()
    }
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> String {
        "host".to_string()
    }

    fn allocate(&self, nbytes: usize) -> Result<BufferHandle> {
        let mut state = self.state.lock();
        if let Some(limit) = self.memory_limit {
            if state.stats.live_bytes.saturating_add(nbytes) > limit {
                return Err(LumenError::Allocation(format!(
                    "{} bytes requested with {} of {} bytes live",
                    nbytes, state.stats.live_bytes, limit
                )));
            }
        }
        let handle = BufferHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.allocations.insert(handle.raw(), Allocation::zeroed(nbytes));
        state.stats.allocations += 1;
        state.stats.live_bytes += nbytes;
        state.stats.peak_bytes = state.stats.peak_bytes.max(state.stats.live_bytes);
        Ok(handle)
    }

    fn free(&self, handle: BufferHandle) {
        let mut state = self.state.lock();
        match state.allocations.remove(&handle.raw()) {
            Some(allocation) => {
                state.stats.frees += 1;
                state.stats.live_bytes -= allocation.nbytes;
            }
            None => {
                state.stats.invalid_frees += 1;
                tracing::warn!("free of unknown or already freed buffer {}", handle);
            }
        }
    }

    fn copy_host_to_device(&self, src: &[u8], dst: BufferHandle, dst_offset: usize) -> Result<()> {
        let mut state = self.state.lock();
        let target = state
            .get_mut(dst)
            .ok_or_else(|| LumenError::Copy(format!("unknown buffer {}", dst)))?;
        let range = byte_range(target.nbytes, dst_offset, src.len())?;
        target.bytes_mut()[range].copy_from_slice(src);
        state.stats.host_to_device += 1;
        Ok(())
    }

    fn copy_device_to_device(&self, src: BufferHandle, dst: BufferHandle, nbytes: usize) -> Result<()> {
        let mut state = self.state.lock();
        let source = state
            .get(src)
            .ok_or_else(|| LumenError::Copy(format!("unknown buffer {}", src)))?;
        let range = byte_range(source.nbytes, 0, nbytes)?;
        let staged = source.bytes()[range.clone()].to_vec();
        let target = state
            .get_mut(dst)
            .ok_or_else(|| LumenError::Copy(format!("unknown buffer {}", dst)))?;
        byte_range(target.nbytes, 0, nbytes)?;
        target.bytes_mut()[range].copy_from_slice(&staged);
        state.stats.device_to_device += 1;
        Ok(())
    }

    fn copy_device_to_host(&self, src: BufferHandle, src_offset: usize, dst: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.take_fault()?;
        let source = state
            .get(src)
            .ok_or_else(|| LumenError::Copy(format!("unknown buffer {}", src)))?;
        let range = byte_range(source.nbytes, src_offset, dst.len())?;
        dst.copy_from_slice(&source.bytes()[range]);
        state.stats.device_to_host += 1;
        Ok(())
    }

    fn launch(&self, kernel: &KernelId, config: LaunchConfig, args: &[KernelArgument<'_>]) -> Result<()> {
        kernel.signature().validate(kernel, args)?;
        let n = element_count(kernel, args)?;
        if config.threads() < n as u64 {
            return Err(LumenError::Launch(format!(
                "{}: {} threads launched for {} elements",
                kernel,
                config.threads(),
                n
            )));
        }

        let mut state = self.state.lock();
        state.stats.launches += 1;
        match kernel.dtype() {
            DType::F32 => execute::<f32>(&mut state, kernel, args, n, self.par_threshold),
            DType::F64 => execute::<f64>(&mut state, kernel, args, n, self.par_threshold),
            DType::I32 => execute::<i32>(&mut state, kernel, args, n, self.par_threshold),
            DType::I64 => execute::<i64>(&mut state, kernel, args, n, self.par_threshold),
        }
    }

    fn synchronize(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.stats.synchronizations += 1;
        state.take_fault()
    }
}

fn byte_range(len: usize, offset: usize, nbytes: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(nbytes) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(LumenError::Copy(format!(
            "range {}..{} exceeds buffer of {} bytes",
            offset,
            offset.saturating_add(nbytes),
            len
        ))),
    }
}

/// The trailing count parameter of a validated argument list.
fn element_count(kernel: &KernelId, args: &[KernelArgument<'_>]) -> Result<usize> {
    match args.last() {
        Some(KernelArgument::Int(n)) => usize::try_from(*n)
            .map_err(|_| LumenError::Launch(format!("{}: negative element count {}", kernel, n))),
        _ => Err(LumenError::Launch(format!("{}: missing element count", kernel))),
    }
}

fn execute<T: Element>(
    state: &mut HostState,
    kernel: &KernelId,
    args: &[KernelArgument<'_>],
    n: usize,
    par_threshold: usize,
) -> Result<()> {
    let is_reduce = matches!(kernel.routine(), Routine::Reduce(_));
    if n == 0 && !is_reduce {
        return Ok(());
    }

    // Inputs are staged so an input may alias the output.
    let mut inputs: SmallVec<[Vec<T>; 2]> = SmallVec::new();
    let mut output = None;
    let mut scalar = None;
    for arg in args {
        match arg {
            KernelArgument::ConstPointer(p) => {
                let source = state.get(p.handle()).map(|a| a.elements::<T>());
                match source {
                    Some(values) if values.len() >= n => inputs.push(values[..n].to_vec()),
                    Some(values) => {
                        return Err(LumenError::Launch(format!(
                            "{}: input {} holds {} elements, launch covers {}",
                            kernel,
                            p.handle(),
                            values.len(),
                            n
                        )))
                    }
                    None if n == 0 => inputs.push(Vec::new()),
                    None => return Err(LumenError::Launch(format!("{}: unknown buffer {}", kernel, p.handle()))),
                }
            }
            KernelArgument::MutPointer(p) => output = Some(p.handle()),
            KernelArgument::Scalar(s) => scalar = s.get::<T>(),
            KernelArgument::Int(_) => {}
        }
    }

    let out_handle = output.ok_or_else(|| LumenError::Launch(format!("{}: no output buffer", kernel)))?;
    let needed = if is_reduce { 1 } else { n };
    let out = state
        .get_mut(out_handle)
        .map(|a| a.elements_mut::<T>())
        .ok_or_else(|| LumenError::Launch(format!("{}: unknown buffer {}", kernel, out_handle)))?;
    if out.len() < needed {
        return Err(LumenError::Launch(format!(
            "{}: output {} holds {} elements, launch writes {}",
            kernel,
            out_handle,
            out.len(),
            needed
        )));
    }
    let out = &mut out[..needed];
    let scalar = || scalar.ok_or_else(|| LumenError::Launch(format!("{}: missing scalar", kernel)));

    match kernel.routine() {
        Routine::Binary(op) => cpu_elementwise::binary(op, &inputs[0], &inputs[1], out, par_threshold),
        Routine::Scalar(op) => cpu_elementwise::binary_scalar(op, &inputs[0], scalar()?, out, par_threshold),
        Routine::Map(f) => cpu_elementwise::map(f, &inputs[0], out, par_threshold),
        Routine::Fill => cpu_elementwise::fill(scalar()?, out, par_threshold),
        Routine::Fused(op) => {
            cpu_elementwise::fused_scaled(op, &inputs[0], &inputs[1], scalar()?, out, par_threshold)
        }
        Routine::Reduce(op) => {
            let other = inputs.get(1).map_or(&[][..], |v| v.as_slice());
            out[0] = cpu_reduce::reduce(op, &inputs[0], other, par_threshold);
        }
    }
    Ok(())
}
