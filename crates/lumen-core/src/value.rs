use std::fmt;

use crate::array::DeviceArray;
use crate::dtype::Element;
use crate::ops::descriptor::UnaryFunction;
use crate::{Device, LumenError, Result};

/// A single device-resident scalar with the same copy-on-write semantics as
/// [`DeviceArray`].
pub struct DeviceValue<T: Element> {
    array: DeviceArray<T>,
}

impl<T: Element> DeviceValue<T> {
    pub fn new(device: &Device, value: T) -> Result<Self> {
        DeviceArray::from_slice(device, &[value]).map(|array| Self { array })
    }

    /// Wrap a one-element array.
    pub fn from_array(array: DeviceArray<T>) -> Result<Self> {
        if array.len() != 1 {
            return Err(LumenError::ShapeMismatch { expected: 1, actual: array.len() });
        }
        Ok(Self { array })
    }

    pub fn get(&self) -> Result<T> {
        self.array.get(0)
    }

    pub fn set(&mut self, value: T) -> Result<()> {
        self.array.set(0, value)
    }

    pub fn device(&self) -> &Device {
        self.array.device()
    }

    pub fn as_array(&self) -> &DeviceArray<T> {
        &self.array
    }

    pub fn into_array(self) -> DeviceArray<T> {
        self.array
    }

    pub fn reference_count(&self) -> usize {
        self.array.reference_count()
    }

    pub fn is_uniquely_owned(&self) -> bool {
        self.array.is_uniquely_owned()
    }

    pub fn shares_buffer_with(&self, other: &DeviceValue<T>) -> bool {
        self.array.shares_buffer_with(&other.array)
    }

    pub fn add_assign(&mut self, rhs: &DeviceValue<T>) -> Result<()> {
        self.array.add_assign(&rhs.array)
    }

    pub fn sub_assign(&mut self, rhs: &DeviceValue<T>) -> Result<()> {
        self.array.sub_assign(&rhs.array)
    }

    pub fn mul_assign(&mut self, rhs: &DeviceValue<T>) -> Result<()> {
        self.array.mul_assign(&rhs.array)
    }

    pub fn div_assign(&mut self, rhs: &DeviceValue<T>) -> Result<()> {
        self.array.div_assign(&rhs.array)
    }

    pub fn increment(&mut self, by: T) -> Result<()> {
        self.array.increment(by)
    }

    pub fn decrement(&mut self, by: T) -> Result<()> {
        self.array.decrement(by)
    }

    pub fn multiply(&mut self, by: T) -> Result<()> {
        self.array.multiply(by)
    }

    pub fn divide(&mut self, by: T) -> Result<()> {
        self.array.divide(by)
    }

    pub fn transform(&mut self, f: UnaryFunction) -> Result<()> {
        self.array.transform(f)
    }
}

impl<T: Element> Clone for DeviceValue<T> {
    fn clone(&self) -> Self {
        Self { array: self.array.clone() }
    }
}

impl<T: Element> PartialEq for DeviceValue<T> {
    fn eq(&self, other: &Self) -> bool {
        self.array == other.array
    }
}

impl<T: Element> fmt::Debug for DeviceValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceValue").field(&self.array).finish()
    }
}

impl<T: Element> TryFrom<DeviceArray<T>> for DeviceValue<T> {
    type Error = LumenError;

    fn try_from(array: DeviceArray<T>) -> Result<Self> {
        Self::from_array(array)
    }
}
