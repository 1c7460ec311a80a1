//! Reductions to a host scalar.
//!
//! Each call blocks until the result is back on the host.

use crate::array::DeviceArray;
use crate::dtype::Element;
use crate::ops::descriptor::ReduceOp;
use crate::Result;

impl<T: Element> DeviceArray<T> {
    /// Sum of all elements. Zero for an empty array.
    pub fn sum(&self) -> Result<T> {
        self.device().engine().reduce(ReduceOp::Sum, self, None)
    }

    /// Sum of absolute values.
    pub fn abs_sum(&self) -> Result<T> {
        self.device().engine().reduce(ReduceOp::AbsSum, self, None)
    }

    /// Inner product with an array of the same length.
    pub fn dot(&self, other: &DeviceArray<T>) -> Result<T> {
        self.device().engine().reduce(ReduceOp::Dot, self, Some(other))
    }
}
