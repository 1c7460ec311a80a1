use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::DeviceBuffer;
use crate::dtype::{DType, Element};
use crate::{Device, LumenError, Result};

/// A one-dimensional array in device memory with value semantics.
///
/// `clone()` shares the underlying [`DeviceBuffer`] and costs one atomic
/// increment. The first mutation of a shared array copies the buffer, so
/// clones never observe each other's writes (copy-on-write).
///
/// ```
/// use lumen_core::prelude::*;
///
/// let device = Device::host();
/// let a = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0])?;
/// let mut b = a.clone();
/// assert!(b.shares_buffer_with(&a));
///
/// b.increment(1.0)?;
/// assert!(!b.shares_buffer_with(&a));
/// assert_eq!(a.to_vec()?, vec![1.0, 2.0, 3.0]);
/// assert_eq!(b.to_vec()?, vec![2.0, 3.0, 4.0]);
/// # Ok::<(), lumen_core::LumenError>(())
/// ```
pub struct DeviceArray<T: Element> {
    buffer: Arc<DeviceBuffer>,
    _marker: PhantomData<T>,
}

impl<T: Element> DeviceArray<T> {
    pub(crate) fn from_buffer(buffer: Arc<DeviceBuffer>) -> Self {
        Self {
            buffer,
            _marker: PhantomData,
        }
    }

    /// Upload `data` into a new buffer.
    pub fn from_slice(device: &Device, data: &[T]) -> Result<Self> {
        DeviceBuffer::from_host(device, data).map(Self::from_buffer)
    }

    /// Uninitialized storage for `len` elements.
    pub fn with_capacity(device: &Device, len: usize) -> Result<Self> {
        DeviceBuffer::allocate(device, T::DTYPE, len).map(Self::from_buffer)
    }

    /// `len` copies of `value`.
    pub fn filled(device: &Device, len: usize, value: T) -> Result<Self> {
        let mut array = Self::with_capacity(device, len)?;
        array.fill(value)?;
        Ok(array)
    }

    pub fn zeros(device: &Device, len: usize) -> Result<Self> {
        Self::filled(device, len, T::ZERO)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn device(&self) -> &Device {
        self.buffer.device()
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Read one element. Costs a one-element device-to-host copy.
    pub fn get(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let mut value = [T::ZERO];
        self.buffer.read_to_host(index, &mut value)?;
        Ok(value[0])
    }

    /// Write one element, copying a shared buffer first.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        self.make_unique()?.write_from_host(index, &[value])
    }

    /// Download the whole array.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![T::ZERO; self.len()];
        self.buffer.read_to_host(0, &mut out)?;
        Ok(out)
    }

    /// The copy-on-write gate. After it returns, this array is the only
    /// owner of its buffer.
    pub fn make_unique(&mut self) -> Result<&DeviceBuffer> {
        if !DeviceBuffer::is_uniquely_owned(&self.buffer) {
            let copy = self.buffer.duplicate()?;
            tracing::trace!(
                "copy-on-write {} -> {} ({} refs remain)",
                self.buffer.handle(),
                copy.handle(),
                DeviceBuffer::reference_count(&self.buffer) - 1
            );
            self.buffer = copy;
        }
        Ok(&*self.buffer)
    }

    pub fn reference_count(&self) -> usize {
        DeviceBuffer::reference_count(&self.buffer)
    }

    pub fn is_uniquely_owned(&self) -> bool {
        DeviceBuffer::is_uniquely_owned(&self.buffer)
    }

    pub fn shares_buffer_with(&self, other: &DeviceArray<T>) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Element-wise comparison of device contents. Arrays sharing a buffer
    /// are equal without a readback.
    pub fn try_eq(&self, other: &DeviceArray<T>) -> Result<bool> {
        if self.shares_buffer_with(other) {
            return Ok(true);
        }
        if self.len() != other.len() {
            return Ok(false);
        }
        Ok(self.to_vec()? == other.to_vec()?)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(LumenError::IndexOutOfBounds { index, len: self.len() });
        }
        Ok(())
    }
}

impl<T: Element> Clone for DeviceArray<T> {
    fn clone(&self) -> Self {
        Self::from_buffer(DeviceBuffer::retain(&self.buffer))
    }
}

impl<T: Element> PartialEq for DeviceArray<T> {
    fn eq(&self, other: &Self) -> bool {
        self.try_eq(other).unwrap_or_else(|e| {
            tracing::warn!("device array comparison failed: {}", e);
            false
        })
    }
}

impl<T: Element> fmt::Debug for DeviceArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("dtype", &T::DTYPE)
            .field("len", &self.len())
            .field("buffer", &self.buffer.handle())
            .field("refs", &self.reference_count())
            .field("device", &self.device().to_string())
            .finish()
    }
}
