use std::sync::Arc;

use crate::backend::BufferHandle;
use crate::dtype::{DType, Element};
use crate::{Device, LumenError, Result};

/// One backend allocation shared by every value that points at it.
///
/// Buffers are always held as `Arc<DeviceBuffer>` and no `Weak` is ever
/// created, so the strong count is the reference count. Dropping the last
/// `Arc` frees the backend allocation exactly once.
///
/// Zero-length buffers carry [`BufferHandle::NULL`] and never reach the
/// backend's `allocate` or `free`.
#[derive(Debug)]
pub struct DeviceBuffer {
    device: Device,
    handle: BufferHandle,
    dtype: DType,
    len: usize,
}

impl DeviceBuffer {
    /// Allocate uninitialized storage for `len` elements.
    pub fn allocate(device: &Device, dtype: DType, len: usize) -> Result<Arc<Self>> {
        let nbytes = dtype.storage_bytes(len);
        let handle = if nbytes == 0 {
            BufferHandle::NULL
        } else {
            let handle = device.backend().allocate(nbytes)?;
            tracing::trace!("allocate {} ({} bytes) on {}", handle, nbytes, device);
            handle
        };
        Ok(Arc::new(Self {
            device: device.clone(),
            handle,
            dtype,
            len,
        }))
    }

    /// Allocate and upload `data`.
    pub fn from_host<T: Element>(device: &Device, data: &[T]) -> Result<Arc<Self>> {
        let buffer = Self::allocate(device, T::DTYPE, data.len())?;
        buffer.write_from_host(0, data)?;
        Ok(buffer)
    }

    /// Add a reference.
    pub fn retain(this: &Arc<Self>) -> Arc<Self> {
        Arc::clone(this)
    }

    /// Drop a reference. Returns `true` if it was the last one and the
    /// allocation has been freed.
    pub fn release(this: Arc<Self>) -> bool {
        Arc::into_inner(this).is_some()
    }

    pub fn reference_count(this: &Arc<Self>) -> usize {
        Arc::strong_count(this)
    }

    /// The copy-on-write gate: `true` when no other value shares the buffer.
    pub fn is_uniquely_owned(this: &Arc<Self>) -> bool {
        Arc::strong_count(this) == 1
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes between consecutive elements.
    pub fn stride(&self) -> usize {
        self.dtype.element_size()
    }

    pub fn nbytes(&self) -> usize {
        self.dtype.storage_bytes(self.len)
    }

    /// Device-to-device copy of the whole buffer into `target`, which must
    /// have the same dtype and length.
    pub fn copy_into(&self, target: &DeviceBuffer) -> Result<()> {
        if !self.device.same_stream(&target.device) {
            return Err(LumenError::DeviceMismatch {
                left: self.device.to_string(),
                right: target.device.to_string(),
            });
        }
        if self.dtype != target.dtype || self.len != target.len {
            return Err(LumenError::Copy(format!(
                "cannot copy {} x {} into {} x {}",
                self.len, self.dtype, target.len, target.dtype
            )));
        }
        if self.nbytes() == 0 {
            return Ok(());
        }
        self.device
            .backend()
            .copy_device_to_device(self.handle, target.handle, self.nbytes())
    }

    /// A fresh buffer holding a copy of this one's contents.
    pub fn duplicate(&self) -> Result<Arc<Self>> {
        let copy = Self::allocate(&self.device, self.dtype, self.len)?;
        self.copy_into(&copy)?;
        tracing::trace!("duplicate {} -> {} ({} bytes)", self.handle, copy.handle, self.nbytes());
        Ok(copy)
    }

    /// Upload `data` into elements `offset..offset + data.len()`.
    ///
    /// Crate-private: writing through a shared buffer would be visible to
    /// every value holding it, so callers go through the copy-on-write gate.
    pub(crate) fn write_from_host<T: Element>(&self, offset: usize, data: &[T]) -> Result<()> {
        self.check_transfer::<T>(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        self.device.backend().copy_host_to_device(
            bytemuck::cast_slice(data),
            self.handle,
            self.dtype.storage_bytes(offset),
        )
    }

    /// Download elements `offset..offset + out.len()`. Blocks until prior
    /// work writing the buffer has completed.
    pub fn read_to_host<T: Element>(&self, offset: usize, out: &mut [T]) -> Result<()> {
        self.check_transfer::<T>(offset, out.len())?;
        if out.is_empty() {
            return Ok(());
        }
        self.device.backend().copy_device_to_host(
            self.handle,
            self.dtype.storage_bytes(offset),
            bytemuck::cast_slice_mut(out),
        )
    }

    fn check_transfer<T: Element>(&self, offset: usize, count: usize) -> Result<()> {
        if T::DTYPE != self.dtype {
            return Err(LumenError::Copy(format!(
                "buffer holds {}, transfer requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        match offset.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(LumenError::IndexOutOfBounds {
                index: offset.saturating_add(count.saturating_sub(1)),
                len: self.len,
            }),
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        tracing::trace!("free {} ({} bytes) on {}", self.handle, self.nbytes(), self.device);
        self.device.backend().free(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::config::EngineConfig;

    fn host() -> (Arc<HostBackend>, Device) {
        let backend = Arc::new(HostBackend::new());
        let device = Device::new(backend.clone(), EngineConfig::default()).unwrap();
        (backend, device)
    }

    #[test]
    fn test_last_release_frees_once() {
        let (backend, device) = host();
        let buffer = DeviceBuffer::from_host(&device, &[1.0f32, 2.0, 3.0]).unwrap();
        let copies: Vec<_> = (0..4).map(|_| DeviceBuffer::retain(&buffer)).collect();
        assert_eq!(DeviceBuffer::reference_count(&buffer), 5);

        for copy in copies {
            assert!(!DeviceBuffer::release(copy));
        }
        assert!(DeviceBuffer::is_uniquely_owned(&buffer));
        assert_eq!(backend.stats().frees, 0);

        assert!(DeviceBuffer::release(buffer));
        let stats = backend.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.invalid_frees, 0);
    }

    #[test]
    fn test_zero_length_never_allocates() {
        let (backend, device) = host();
        let buffer = DeviceBuffer::allocate(&device, DType::F64, 0).unwrap();
        assert!(buffer.handle().is_null());
        let copy = buffer.duplicate().unwrap();
        drop(buffer);
        drop(copy);
        let stats = backend.stats();
        assert_eq!(stats.allocations, 0);
        assert_eq!(stats.frees, 0);
    }

    #[test]
    fn test_duplicate_copies_contents() {
        let (_backend, device) = host();
        let buffer = DeviceBuffer::from_host(&device, &[4i32, 5, 6]).unwrap();
        let copy = buffer.duplicate().unwrap();
        assert_ne!(copy.handle(), buffer.handle());
        let mut out = [0i32; 3];
        copy.read_to_host(0, &mut out).unwrap();
        assert_eq!(out, [4, 5, 6]);
    }

    #[test]
    fn test_copy_into_rejects_mismatch() {
        let (_backend, device) = host();
        let a = DeviceBuffer::from_host(&device, &[1.0f32, 2.0]).unwrap();
        let b = DeviceBuffer::allocate(&device, DType::F32, 3).unwrap();
        let c = DeviceBuffer::allocate(&device, DType::I32, 2).unwrap();
        assert!(matches!(a.copy_into(&b), Err(LumenError::Copy(_))));
        assert!(matches!(a.copy_into(&c), Err(LumenError::Copy(_))));
    }

    #[test]
    fn test_ranged_transfers() {
        let (_backend, device) = host();
        let buffer = DeviceBuffer::from_host(&device, &[0i64; 4]).unwrap();
        buffer.write_from_host(2, &[7i64, 8]).unwrap();
        let mut tail = [0i64; 2];
        buffer.read_to_host(2, &mut tail).unwrap();
        assert_eq!(tail, [7, 8]);

        assert!(matches!(
            buffer.write_from_host(3, &[1i64, 2]),
            Err(LumenError::IndexOutOfBounds { index: 4, len: 4 })
        ));
        let mut wrong = [0f64; 1];
        assert!(matches!(buffer.read_to_host(0, &mut wrong), Err(LumenError::Copy(_))));
    }
}
