//! Elementwise arithmetic on device arrays.
//!
//! Methods taking `&mut self` run in place through the copy-on-write gate.
//! The non-mutating forms clone first and let the gate do the copy.

use crate::array::DeviceArray;
use crate::dtype::Element;
use crate::ops::descriptor::{lookup_function, BinaryOp, OperationDescriptor, UnaryFunction};
use crate::Result;

impl<T: Element> DeviceArray<T> {
    fn apply(&mut self, descriptor: OperationDescriptor<T>, sources: &[&DeviceArray<T>]) -> Result<()> {
        let engine = self.device().engine();
        engine.apply(descriptor, self, sources)
    }

    /// `self[i] = self[i] op rhs[i]`
    pub fn assign_binary(&mut self, op: BinaryOp, rhs: &DeviceArray<T>) -> Result<()> {
        self.apply(OperationDescriptor::ElementwiseBinary(op), &[rhs])
    }

    pub fn add_assign(&mut self, rhs: &DeviceArray<T>) -> Result<()> {
        self.assign_binary(BinaryOp::Add, rhs)
    }

    pub fn sub_assign(&mut self, rhs: &DeviceArray<T>) -> Result<()> {
        self.assign_binary(BinaryOp::Sub, rhs)
    }

    pub fn mul_assign(&mut self, rhs: &DeviceArray<T>) -> Result<()> {
        self.assign_binary(BinaryOp::Mul, rhs)
    }

    /// Integer division by zero yields zero.
    pub fn div_assign(&mut self, rhs: &DeviceArray<T>) -> Result<()> {
        self.assign_binary(BinaryOp::Div, rhs)
    }

    /// `self[i] = self[i] op scalar`
    pub fn assign_scalar(&mut self, op: BinaryOp, scalar: T) -> Result<()> {
        self.apply(OperationDescriptor::ElementwiseScalar(op, scalar), &[])
    }

    pub fn increment(&mut self, by: T) -> Result<()> {
        self.assign_scalar(BinaryOp::Add, by)
    }

    pub fn decrement(&mut self, by: T) -> Result<()> {
        self.assign_scalar(BinaryOp::Sub, by)
    }

    pub fn multiply(&mut self, by: T) -> Result<()> {
        self.assign_scalar(BinaryOp::Mul, by)
    }

    pub fn divide(&mut self, by: T) -> Result<()> {
        self.assign_scalar(BinaryOp::Div, by)
    }

    /// Apply a catalog function to every element.
    pub fn transform(&mut self, f: UnaryFunction) -> Result<()> {
        self.apply(OperationDescriptor::Map(f), &[])
    }

    /// [`transform`](Self::transform) by function name (`"sqrt"`). Names
    /// outside the catalog fail with `UnsupportedOperation` and leave the
    /// array unchanged.
    pub fn transform_named(&mut self, name: &str) -> Result<()> {
        let f = lookup_function(name, T::DTYPE)?;
        self.transform(f)
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: T) -> Result<()> {
        self.apply(OperationDescriptor::Fill(value), &[])
    }

    /// `self[i] = left[i] op (scale * right[i])` in one launch.
    pub fn assign_fused(&mut self, left: &DeviceArray<T>, op: BinaryOp, scale: T, right: &DeviceArray<T>) -> Result<()> {
        self.apply(OperationDescriptor::CompositeAssign(op, scale), &[left, right])
    }

    pub fn add(&self, rhs: &DeviceArray<T>) -> Result<DeviceArray<T>> {
        self.with(|out| out.add_assign(rhs))
    }

    pub fn sub(&self, rhs: &DeviceArray<T>) -> Result<DeviceArray<T>> {
        self.with(|out| out.sub_assign(rhs))
    }

    pub fn mul(&self, rhs: &DeviceArray<T>) -> Result<DeviceArray<T>> {
        self.with(|out| out.mul_assign(rhs))
    }

    pub fn div(&self, rhs: &DeviceArray<T>) -> Result<DeviceArray<T>> {
        self.with(|out| out.div_assign(rhs))
    }

    /// `self * scale` as a new array.
    pub fn scaled(&self, scale: T) -> Result<DeviceArray<T>> {
        self.with(|out| out.multiply(scale))
    }

    /// `f(self)` as a new array.
    pub fn mapped(&self, f: UnaryFunction) -> Result<DeviceArray<T>> {
        self.with(|out| out.transform(f))
    }

    fn with(&self, op: impl FnOnce(&mut DeviceArray<T>) -> Result<()>) -> Result<DeviceArray<T>> {
        let mut out = self.clone();
        op(&mut out)?;
        Ok(out)
    }
}
