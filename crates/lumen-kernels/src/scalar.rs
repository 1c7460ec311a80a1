//! Arithmetic element types the host kernels are instantiated for.

use std::fmt;

use crate::op::{BinaryOp, UnaryFunction};

/// A plain-old-data element the host kernels know how to compute with.
///
/// Integer arithmetic wraps on overflow and integer division by zero yields
/// zero, matching the behavior of the CUDA kernels rather than panicking.
pub trait KernelScalar: bytemuck::Pod + Send + Sync + PartialOrd + fmt::Debug + 'static {
    const ZERO: Self;
    const IS_FLOAT: bool;

    fn binary(self, op: BinaryOp, rhs: Self) -> Self;
    fn unary(self, f: UnaryFunction) -> Self;
    fn abs_value(self) -> Self;
}

macro_rules! impl_float_scalar {
    ($($t:ty),*) => {$(
        impl KernelScalar for $t {
            const ZERO: Self = 0.0;
            const IS_FLOAT: bool = true;

            #[inline]
            fn binary(self, op: BinaryOp, rhs: Self) -> Self {
                match op {
                    BinaryOp::Add => self + rhs,
                    BinaryOp::Sub => self - rhs,
                    BinaryOp::Mul => self * rhs,
                    BinaryOp::Div => self / rhs,
                }
            }

            #[inline]
            fn unary(self, f: UnaryFunction) -> Self {
                match f {
                    UnaryFunction::Sin => self.sin(),
                    UnaryFunction::Cos => self.cos(),
                    UnaryFunction::Tan => self.tan(),
                    UnaryFunction::Tanh => self.tanh(),
                    UnaryFunction::Ceil => self.ceil(),
                    UnaryFunction::Floor => self.floor(),
                    UnaryFunction::Exp => self.exp(),
                    UnaryFunction::Log => self.ln(),
                    UnaryFunction::Sqrt => self.sqrt(),
                    UnaryFunction::Abs => self.abs(),
                    UnaryFunction::Neg => -self,
                }
            }

            #[inline]
            fn abs_value(self) -> Self {
                self.abs()
            }
        }
    )*};
}

macro_rules! impl_int_scalar {
    ($($t:ty),*) => {$(
        impl KernelScalar for $t {
            const ZERO: Self = 0;
            const IS_FLOAT: bool = false;

            #[inline]
            fn binary(self, op: BinaryOp, rhs: Self) -> Self {
                match op {
                    BinaryOp::Add => self.wrapping_add(rhs),
                    BinaryOp::Sub => self.wrapping_sub(rhs),
                    BinaryOp::Mul => self.wrapping_mul(rhs),
                    BinaryOp::Div if rhs == 0 => 0,
                    BinaryOp::Div => self.wrapping_div(rhs),
                }
            }

            // Float-only catalog entries are rejected before launch; evaluate
            // them through f64 so a hand-built launch still has defined output.
            #[inline]
            fn unary(self, f: UnaryFunction) -> Self {
                match f {
                    UnaryFunction::Abs => self.wrapping_abs(),
                    UnaryFunction::Neg => self.wrapping_neg(),
                    other => (self as f64).unary(other) as $t,
                }
            }

            #[inline]
            fn abs_value(self) -> Self {
                self.wrapping_abs()
            }
        }
    )*};
}

impl_float_scalar!(f32, f64);
impl_int_scalar!(i32, i64);
