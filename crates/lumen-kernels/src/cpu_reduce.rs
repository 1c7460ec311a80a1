//! Reduction host kernels: sum, sum of absolute values, dot product.

use rayon::prelude::*;

use crate::op::{BinaryOp, ReduceOp};
use crate::scalar::KernelScalar;

#[inline]
fn add<T: KernelScalar>(a: T, b: T) -> T {
    a.binary(BinaryOp::Add, b)
}

/// Sum of all elements.
pub fn sum<T: KernelScalar>(a: &[T], par_threshold: usize) -> T {
    if a.len() >= par_threshold {
        a.par_iter().copied().reduce(|| T::ZERO, add)
    } else {
        a.iter().copied().fold(T::ZERO, add)
    }
}

/// Sum of absolute values.
pub fn abs_sum<T: KernelScalar>(a: &[T], par_threshold: usize) -> T {
    if a.len() >= par_threshold {
        a.par_iter().map(|x| x.abs_value()).reduce(|| T::ZERO, add)
    } else {
        a.iter().map(|x| x.abs_value()).fold(T::ZERO, add)
    }
}

/// Inner product over the common prefix of `a` and `b`.
pub fn dot<T: KernelScalar>(a: &[T], b: &[T], par_threshold: usize) -> T {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);
    if n >= par_threshold {
        a.par_iter()
            .zip(b.par_iter())
            .map(|(&x, &y)| x.binary(BinaryOp::Mul, y))
            .reduce(|| T::ZERO, add)
    } else {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| x.binary(BinaryOp::Mul, y))
            .fold(T::ZERO, add)
    }
}

/// Dispatch a [`ReduceOp`]. `b` is only read by [`ReduceOp::Dot`].
pub fn reduce<T: KernelScalar>(op: ReduceOp, a: &[T], b: &[T], par_threshold: usize) -> T {
    match op {
        ReduceOp::Sum => sum(a, par_threshold),
        ReduceOp::AbsSum => abs_sum(a, par_threshold),
        ReduceOp::Dot => dot(a, b, par_threshold),
    }
}
