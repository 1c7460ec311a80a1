//! CUDA backend over `lumen-kernels`' device heap and catalog module.

use lumen_kernels::cuda::launch::{get_or_load_func, launch_config, launch_slots};
use lumen_kernels::cuda::{catalog_funcs, CudaError, DeviceHeap, CATALOG_CU, CATALOG_MODULE};

use super::{BufferHandle, ComputeBackend, LaunchConfig};
use crate::argument::KernelArgument;
use crate::ops::descriptor::{KernelId, Routine};
use crate::{LumenError, Result};

/// One CUDA device and its default stream.
#[derive(Debug)]
pub struct CudaBackend {
    heap: DeviceHeap,
}

impl CudaBackend {
    pub fn new(device_idx: usize) -> Result<Self> {
        let heap = DeviceHeap::new(device_idx).map_err(|e| LumenError::Allocation(e.to_string()))?;
        Ok(Self { heap })
    }

    pub fn device_idx(&self) -> usize {
        self.heap.device_idx()
    }

    fn device_ptr(&self, handle: BufferHandle) -> Result<u64> {
        self.heap
            .device_ptr(handle.raw())
            .map_err(|e| LumenError::Launch(e.to_string()))
    }
}

impl ComputeBackend for CudaBackend {
    fn name(&self) -> String {
        format!("cuda:{}", self.heap.device_idx())
    }

    fn allocate(&self, nbytes: usize) -> Result<BufferHandle> {
        self.heap
            .alloc(nbytes)
            .map(BufferHandle::from_raw)
            .map_err(|e| LumenError::Allocation(e.to_string()))
    }

    fn free(&self, handle: BufferHandle) {
        if !self.heap.free(handle.raw()) {
            tracing::warn!("free of unknown or already freed buffer {} on {}", handle, self.name());
        }
    }

    fn copy_host_to_device(&self, src: &[u8], dst: BufferHandle, dst_offset: usize) -> Result<()> {
        self.heap
            .write(dst.raw(), dst_offset, src)
            .map_err(|e| LumenError::Copy(e.to_string()))
    }

    fn copy_device_to_device(&self, src: BufferHandle, dst: BufferHandle, nbytes: usize) -> Result<()> {
        self.heap
            .copy(src.raw(), dst.raw(), nbytes)
            .map_err(|e| LumenError::Copy(e.to_string()))
    }

    fn copy_device_to_host(&self, src: BufferHandle, src_offset: usize, dst: &mut [u8]) -> Result<()> {
        self.heap
            .read(src.raw(), src_offset, dst)
            .map_err(|e| LumenError::Copy(e.to_string()))
    }

    fn launch(&self, kernel: &KernelId, config: LaunchConfig, args: &[KernelArgument<'_>]) -> Result<()> {
        kernel.signature().validate(kernel, args)?;
        let name = kernel.name();
        let funcs = catalog_funcs();
        let func = get_or_load_func(
            self.heap.device(),
            self.heap.device_idx(),
            CATALOG_MODULE,
            &name,
            CATALOG_CU,
            &funcs,
        )
        .map_err(|e| match e {
            CudaError::FuncNotFound { .. } => LumenError::UnsupportedOperation {
                operation: name.clone(),
                dtype: kernel.dtype(),
            },
            other => LumenError::Launch(other.to_string()),
        })?;

        let mut slots = Vec::with_capacity(args.len());
        for arg in args {
            let slot = match arg {
                KernelArgument::Scalar(s) => s.to_slot(),
                KernelArgument::ConstPointer(p) => self.device_ptr(p.handle())?,
                KernelArgument::MutPointer(p) => {
                    // Reductions accumulate into their output with atomicAdd.
                    if matches!(kernel.routine(), Routine::Reduce(_)) {
                        self.heap
                            .zero(p.handle().raw())
                            .map_err(|e| LumenError::Launch(e.to_string()))?;
                    }
                    self.device_ptr(p.handle())?
                }
                KernelArgument::Int(n) => *n as u64,
            };
            slots.push(slot);
        }

        let cfg = launch_config(config.grid, config.block);
        // SAFETY: the slots follow the validated signature, and every pointer
        // argument borrows a live DeviceBuffer whose free is ordered after
        // this launch on the same stream.
        unsafe { launch_slots(func, cfg, &mut slots) }.map_err(|e| LumenError::Launch(e.to_string()))
    }

    fn synchronize(&self) -> Result<()> {
        self.heap
            .synchronize()
            .map_err(|e| LumenError::Launch(e.to_string()))
    }
}
