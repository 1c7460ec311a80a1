//! GPU memory allocation and host↔device transfer utilities.
//!
//! Allocations are addressed by opaque `u64` ids so the layer above never
//! holds a `CudaSlice` directly. Id 0 is the null allocation: it is never
//! handed out and reads as a null device pointer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaSlice, DevicePtr, DeviceSlice};
use parking_lot::Mutex;

use super::context::{get_device, CudaError};

/// Byte-addressed allocations on one CUDA device.
pub struct DeviceHeap {
    device: Arc<CudaDevice>,
    device_idx: usize,
    slices: Mutex<HashMap<u64, CudaSlice<u8>>>,
    next_id: AtomicU64,
}

impl DeviceHeap {
    pub fn new(device_idx: usize) -> Result<Self, CudaError> {
        Ok(Self {
            device: get_device(device_idx)?,
            device_idx,
            slices: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    pub fn device_idx(&self) -> usize {
        self.device_idx
    }

    /// Allocate `nbytes` of uninitialized device memory.
    pub fn alloc(&self, nbytes: usize) -> Result<u64, CudaError> {
        let slice = unsafe { self.device.alloc::<u8>(nbytes) }
            .map_err(|e| CudaError::Alloc { nbytes, msg: e.to_string() })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slices.lock().insert(id, slice);
        Ok(id)
    }

    /// Release an allocation. Returns `false` if the id was not live.
    pub fn free(&self, id: u64) -> bool {
        // Dropping the slice enqueues the free on the device stream, after
        // any launch still reading it.
        self.slices.lock().remove(&id).is_some()
    }

    /// H2D copy of `src` into allocation `id` starting at byte `offset`.
    pub fn write(&self, id: u64, offset: usize, src: &[u8]) -> Result<(), CudaError> {
        if src.is_empty() {
            return Ok(());
        }
        let mut slices = self.slices.lock();
        let slice = slices.get_mut(&id).ok_or(CudaError::UnknownHandle(id))?;
        check_range(slice.len(), offset, src.len())?;
        let mut view = slice.slice_mut(offset..offset + src.len());
        self.device
            .htod_sync_copy_into(src, &mut view)
            .map_err(|e| CudaError::Transfer(format!("htod_copy({} bytes): {}", src.len(), e)))
    }

    /// D2H copy from allocation `id` starting at byte `offset` into `dst`.
    pub fn read(&self, id: u64, offset: usize, dst: &mut [u8]) -> Result<(), CudaError> {
        if dst.is_empty() {
            return Ok(());
        }
        let slices = self.slices.lock();
        let slice = slices.get(&id).ok_or(CudaError::UnknownHandle(id))?;
        check_range(slice.len(), offset, dst.len())?;
        let view = slice.slice(offset..offset + dst.len());
        self.device
            .dtoh_sync_copy_into(&view, dst)
            .map_err(|e| CudaError::Transfer(format!("dtoh_copy({} bytes): {}", dst.len(), e)))
    }

    /// D2D copy of the first `nbytes` of `src` into `dst`.
    pub fn copy(&self, src: u64, dst: u64, nbytes: usize) -> Result<(), CudaError> {
        if nbytes == 0 || src == dst {
            return Ok(());
        }
        let mut slices = self.slices.lock();
        let mut target = slices.remove(&dst).ok_or(CudaError::UnknownHandle(dst))?;
        let result = match slices.get(&src) {
            Some(source) => check_range(source.len(), 0, nbytes)
                .and_then(|_| check_range(target.len(), 0, nbytes))
                .and_then(|_| {
                    let mut view = target.slice_mut(0..nbytes);
                    self.device
                        .dtod_copy(&source.slice(0..nbytes), &mut view)
                        .map_err(|e| CudaError::Transfer(format!("dtod_copy({} bytes): {}", nbytes, e)))
                }),
            None => Err(CudaError::UnknownHandle(src)),
        };
        slices.insert(dst, target);
        result
    }

    /// Zero every byte of allocation `id`.
    pub fn zero(&self, id: u64) -> Result<(), CudaError> {
        let mut slices = self.slices.lock();
        let slice = slices.get_mut(&id).ok_or(CudaError::UnknownHandle(id))?;
        self.device
            .memset_zeros(slice)
            .map_err(|e| CudaError::Transfer(format!("memset_zeros: {}", e)))
    }

    /// Raw device address of allocation `id` (0 for the null allocation).
    pub fn device_ptr(&self, id: u64) -> Result<u64, CudaError> {
        if id == 0 {
            return Ok(0);
        }
        let slices = self.slices.lock();
        let slice = slices.get(&id).ok_or(CudaError::UnknownHandle(id))?;
        Ok(*slice.device_ptr())
    }

    /// Block until all work queued on this device has completed.
    pub fn synchronize(&self) -> Result<(), CudaError> {
        self.device
            .synchronize()
            .map_err(|e| CudaError::Launch(format!("synchronize: {}", e)))
    }
}

impl fmt::Debug for DeviceHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHeap")
            .field("device_idx", &self.device_idx)
            .field("live", &self.slices.lock().len())
            .finish()
    }
}

fn check_range(len: usize, offset: usize, nbytes: usize) -> Result<(), CudaError> {
    match offset.checked_add(nbytes) {
        Some(end) if end <= len => Ok(()),
        _ => Err(CudaError::Transfer(format!(
            "range {}..{} exceeds allocation of {} bytes",
            offset,
            offset.saturating_add(nbytes),
            len
        ))),
    }
}
