//! Elementwise host kernels.
//!
//! Each function is the host counterpart of one CUDA kernel family in
//! `cuda/kernels/catalog.cu`: one lane per output element, no cross-lane
//! dependencies. Outputs at or above `par_threshold` elements are split into
//! chunks across the rayon pool.
//!
//! Callers validate lengths; lanes are paired with `zip`, so an input shorter
//! than `out` leaves the tail of `out` untouched.

use rayon::prelude::*;

use crate::op::{BinaryOp, UnaryFunction};
use crate::scalar::KernelScalar;

/// Elements handed to one rayon task.
const CHUNK: usize = 4096;

/// `out[i] = a[i] op b[i]`
pub fn binary<T: KernelScalar>(op: BinaryOp, a: &[T], b: &[T], out: &mut [T], par_threshold: usize) {
    if out.len() >= par_threshold {
        out.par_chunks_mut(CHUNK)
            .enumerate()
            .for_each(|(c, chunk)| {
                let base = c * CHUNK;
                for (i, o) in chunk.iter_mut().enumerate() {
                    if let (Some(&x), Some(&y)) = (a.get(base + i), b.get(base + i)) {
                        *o = x.binary(op, y);
                    }
                }
            });
    } else {
        for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
            *o = x.binary(op, y);
        }
    }
}

/// `out[i] = a[i] op scalar`
pub fn binary_scalar<T: KernelScalar>(op: BinaryOp, a: &[T], scalar: T, out: &mut [T], par_threshold: usize) {
    map_lanes(a, out, par_threshold, |x| x.binary(op, scalar));
}

/// `out[i] = f(a[i])`
pub fn map<T: KernelScalar>(f: UnaryFunction, a: &[T], out: &mut [T], par_threshold: usize) {
    map_lanes(a, out, par_threshold, |x| x.unary(f));
}

/// `out[i] = value`
pub fn fill<T: KernelScalar>(value: T, out: &mut [T], par_threshold: usize) {
    if out.len() >= par_threshold {
        out.par_chunks_mut(CHUNK).for_each(|chunk| chunk.fill(value));
    } else {
        out.fill(value);
    }
}

/// Fused `out[i] = left[i] op (scale * right[i])` in a single pass.
pub fn fused_scaled<T: KernelScalar>(
    op: BinaryOp,
    left: &[T],
    right: &[T],
    scale: T,
    out: &mut [T],
    par_threshold: usize,
) {
    let lane = |x: T, y: T| x.binary(op, scale.binary(BinaryOp::Mul, y));
    if out.len() >= par_threshold {
        out.par_chunks_mut(CHUNK)
            .enumerate()
            .for_each(|(c, chunk)| {
                let base = c * CHUNK;
                for (i, o) in chunk.iter_mut().enumerate() {
                    if let (Some(&x), Some(&y)) = (left.get(base + i), right.get(base + i)) {
                        *o = lane(x, y);
                    }
                }
            });
    } else {
        for ((o, &x), &y) in out.iter_mut().zip(left).zip(right) {
            *o = lane(x, y);
        }
    }
}

#[inline]
fn map_lanes<T: KernelScalar>(a: &[T], out: &mut [T], par_threshold: usize, f: impl Fn(T) -> T + Sync) {
    if out.len() >= par_threshold {
        out.par_chunks_mut(CHUNK)
            .zip(a.par_chunks(CHUNK))
            .for_each(|(o, x)| {
                for (o, &x) in o.iter_mut().zip(x) {
                    *o = f(x);
                }
            });
    } else {
        for (o, &x) in out.iter_mut().zip(a) {
            *o = f(x);
        }
    }
}
