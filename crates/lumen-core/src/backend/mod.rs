//! The compute-backend contract.
//!
//! A backend owns one device address space and one submission stream. Work
//! submitted through it executes in submission order; only
//! [`ComputeBackend::synchronize`] and device→host copies block the caller.

use std::fmt;

use crate::argument::KernelArgument;
use crate::ops::descriptor::KernelId;
use crate::Result;

pub mod host;
#[cfg(feature = "cuda")]
pub mod cuda;

pub use host::{BackendStats, HostBackend};
#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;

/// Opaque handle to one backend allocation.
///
/// [`BufferHandle::NULL`] stands for the zero-byte allocation, which is never
/// passed to `allocate` or `free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub const NULL: BufferHandle = BufferHandle(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Grid/block decomposition of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
}

impl LaunchConfig {
    /// 1-D launch with one thread per element.
    pub fn for_elements(n: usize, block_size: usize) -> Self {
        let grid = (n + block_size - 1) / block_size;
        Self {
            grid: (grid as u32, 1, 1),
            block: (block_size as u32, 1, 1),
        }
    }

    /// Total threads launched.
    pub fn threads(&self) -> u64 {
        let (gx, gy, gz) = self.grid;
        let (bx, by, bz) = self.block;
        gx as u64 * gy as u64 * gz as u64 * bx as u64 * by as u64 * bz as u64
    }
}

/// Primitives a device must provide. Everything else is built on top.
///
/// `free` must be invoked exactly once per handle returned by `allocate`;
/// a second free of the same handle is a bug in the caller.
pub trait ComputeBackend: Send + Sync + fmt::Debug {
    /// Short label for logs and errors (`host`, `cuda:0`).
    fn name(&self) -> String;

    fn allocate(&self, nbytes: usize) -> Result<BufferHandle>;

    fn free(&self, handle: BufferHandle);

    /// Copy `src` into `dst` starting at byte `dst_offset`.
    fn copy_host_to_device(&self, src: &[u8], dst: BufferHandle, dst_offset: usize) -> Result<()>;

    /// Copy the first `nbytes` of `src` into `dst`.
    fn copy_device_to_device(&self, src: BufferHandle, dst: BufferHandle, nbytes: usize) -> Result<()>;

    /// Copy `dst.len()` bytes out of `src` starting at byte `src_offset`.
    /// Waits for prior work touching `src`.
    fn copy_device_to_host(&self, src: BufferHandle, src_offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Enqueue `kernel` with arguments in the kernel's declared parameter order.
    fn launch(&self, kernel: &KernelId, config: LaunchConfig, args: &[KernelArgument<'_>]) -> Result<()>;

    /// Block until all submitted work has completed. Faults raised by earlier
    /// launches surface here.
    fn synchronize(&self) -> Result<()>;
}
