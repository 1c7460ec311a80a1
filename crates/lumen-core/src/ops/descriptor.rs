//! The closed operation catalog.
//!
//! Every operation the engine can run is an [`OperationDescriptor`] mapped by
//! [`kernel_for`] onto exactly one [`KernelId`] per element type. Backends
//! carry one kernel per id; adding an operation means adding a tag here and a
//! kernel in every backend.

use std::fmt;

pub use lumen_kernels::op::{BinaryOp, ReduceOp, UnaryFunction};

use crate::argument::{KernelSignature, ParamKind};
use crate::dtype::{DType, Element};
use crate::{LumenError, Result};

const DTYPES: [DType; 4] = [DType::F32, DType::F64, DType::I32, DType::I64];

/// Kernel family, independent of element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Routine {
    /// `out[i] = a[i] op b[i]`
    Binary(BinaryOp),
    /// `out[i] = a[i] op s`
    Scalar(BinaryOp),
    /// `out[i] = f(a[i])`
    Map(UnaryFunction),
    /// `out[i] = s`
    Fill,
    /// `out[i] = left[i] op (s * right[i])`
    Fused(BinaryOp),
    /// `out[0] = reduce(a[, b])`
    Reduce(ReduceOp),
}

/// Identifies one kernel of the catalog: a routine instantiated for a dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId {
    routine: Routine,
    dtype: DType,
}

impl KernelId {
    /// Look up `routine` for `dtype`; fails for combinations the catalog does
    /// not carry (floating-point maps over integer elements).
    pub fn new(routine: Routine, dtype: DType) -> Result<Self> {
        if let Routine::Map(f) = routine {
            if f.requires_float() && !dtype.is_float() {
                return Err(LumenError::UnsupportedOperation {
                    operation: f.name().to_string(),
                    dtype,
                });
            }
        }
        Ok(Self { routine, dtype })
    }

    pub fn binary(op: BinaryOp, dtype: DType) -> Result<Self> {
        Self::new(Routine::Binary(op), dtype)
    }

    pub fn scalar(op: BinaryOp, dtype: DType) -> Result<Self> {
        Self::new(Routine::Scalar(op), dtype)
    }

    pub fn map(f: UnaryFunction, dtype: DType) -> Result<Self> {
        Self::new(Routine::Map(f), dtype)
    }

    pub fn fill(dtype: DType) -> Result<Self> {
        Self::new(Routine::Fill, dtype)
    }

    pub fn fused(op: BinaryOp, dtype: DType) -> Result<Self> {
        Self::new(Routine::Fused(op), dtype)
    }

    pub fn reduce(op: ReduceOp, dtype: DType) -> Result<Self> {
        Self::new(Routine::Reduce(op), dtype)
    }

    /// Resolve a kernel by its exported name (`add_scalar_f32`). Names with
    /// no dtype suffix fail with `UnknownKernel`.
    pub fn from_name(name: &str) -> Result<Self> {
        DTYPES
            .iter()
            .flat_map(|&dtype| Self::catalog(dtype))
            .find(|id| id.name() == name)
            .ok_or_else(|| match dtype_from_suffix(name) {
                Some(dtype) => LumenError::UnsupportedOperation {
                    operation: name.to_string(),
                    dtype,
                },
                None => LumenError::UnknownKernel(name.to_string()),
            })
    }

    /// Every kernel carried for `dtype`.
    pub fn catalog(dtype: DType) -> Vec<KernelId> {
        let mut routines = Vec::with_capacity(32);
        for op in BinaryOp::ALL {
            routines.push(Routine::Binary(op));
            routines.push(Routine::Scalar(op));
            routines.push(Routine::Fused(op));
        }
        routines.push(Routine::Fill);
        routines.extend(ReduceOp::ALL.into_iter().map(Routine::Reduce));
        routines.extend(UnaryFunction::ALL.into_iter().map(Routine::Map));
        routines
            .into_iter()
            .filter_map(|routine| Self::new(routine, dtype).ok())
            .collect()
    }

    pub fn routine(&self) -> Routine {
        self.routine
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Exported kernel name, identical across backends.
    pub fn name(&self) -> String {
        let d = self.dtype.suffix();
        match self.routine {
            Routine::Binary(op) => format!("{}_{}", op, d),
            Routine::Scalar(op) => format!("{}_scalar_{}", op, d),
            Routine::Map(f) => format!("{}_{}", f, d),
            Routine::Fill => format!("fill_{}", d),
            Routine::Fused(op) => format!("fused_{}_{}", op, d),
            Routine::Reduce(op) => format!("reduce_{}_{}", op, d),
        }
    }

    /// Declared parameter list. The trailing `i64` is always the element count.
    pub fn signature(&self) -> KernelSignature {
        let d = self.dtype;
        let (c, m, s) = (ParamKind::ConstPointer(d), ParamKind::MutPointer(d), ParamKind::Scalar(d));
        let n = ParamKind::Int;
        match self.routine {
            Routine::Binary(_) => KernelSignature::new(&[c, c, m, n]),
            Routine::Scalar(_) => KernelSignature::new(&[c, s, m, n]),
            Routine::Map(_) => KernelSignature::new(&[c, m, n]),
            Routine::Fill => KernelSignature::new(&[m, s, n]),
            Routine::Fused(_) => KernelSignature::new(&[c, c, s, m, n]),
            Routine::Reduce(ReduceOp::Dot) => KernelSignature::new(&[c, c, m, n]),
            Routine::Reduce(_) => KernelSignature::new(&[c, m, n]),
        }
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn dtype_from_suffix(name: &str) -> Option<DType> {
    let suffix = name.rsplit('_').next()?;
    DTYPES.into_iter().find(|d| d.suffix() == suffix)
}

/// One request to the elementwise engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperationDescriptor<T> {
    /// `dest = dest op source`
    ElementwiseBinary(BinaryOp),
    /// `dest = dest op scalar`
    ElementwiseScalar(BinaryOp, T),
    /// `dest = f(dest)`
    Map(UnaryFunction),
    /// `dest[0] = reduce(sources)`
    Reduce(ReduceOp),
    /// `dest = value`
    Fill(T),
    /// `dest = left op (scale * right)`
    CompositeAssign(BinaryOp, T),
}

impl<T: Element> OperationDescriptor<T> {
    /// Kernel implementing this operation for `T`.
    pub fn kernel(&self) -> Result<KernelId> {
        kernel_for(self, T::DTYPE)
    }

    /// Number of source arrays read besides the destination.
    pub fn operand_count(&self) -> usize {
        match self {
            OperationDescriptor::ElementwiseBinary(_) => 1,
            OperationDescriptor::ElementwiseScalar(..)
            | OperationDescriptor::Map(_)
            | OperationDescriptor::Fill(_) => 0,
            OperationDescriptor::Reduce(op) => op.arity(),
            OperationDescriptor::CompositeAssign(..) => 2,
        }
    }

    /// Scalar payload carried by the descriptor, if any.
    pub fn scalar(&self) -> Option<T> {
        match *self {
            OperationDescriptor::ElementwiseScalar(_, s)
            | OperationDescriptor::Fill(s)
            | OperationDescriptor::CompositeAssign(_, s) => Some(s),
            _ => None,
        }
    }
}

/// The dispatch table: descriptor tag to catalog kernel.
pub fn kernel_for<T>(descriptor: &OperationDescriptor<T>, dtype: DType) -> Result<KernelId> {
    let routine = match *descriptor {
        OperationDescriptor::ElementwiseBinary(op) => Routine::Binary(op),
        OperationDescriptor::ElementwiseScalar(op, _) => Routine::Scalar(op),
        OperationDescriptor::Map(f) => Routine::Map(f),
        OperationDescriptor::Reduce(op) => Routine::Reduce(op),
        OperationDescriptor::Fill(_) => Routine::Fill,
        OperationDescriptor::CompositeAssign(op, _) => Routine::Fused(op),
    };
    KernelId::new(routine, dtype)
}

/// Resolve a unary function by name for `dtype`.
pub fn lookup_function(name: &str, dtype: DType) -> Result<UnaryFunction> {
    let f = UnaryFunction::from_name(name).ok_or_else(|| LumenError::UnsupportedOperation {
        operation: name.to_string(),
        dtype,
    })?;
    KernelId::map(f, dtype)?;
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_names() {
        assert_eq!(KernelId::binary(BinaryOp::Add, DType::F32).unwrap().name(), "add_f32");
        assert_eq!(KernelId::scalar(BinaryOp::Div, DType::I64).unwrap().name(), "div_scalar_i64");
        assert_eq!(KernelId::map(UnaryFunction::Tanh, DType::F64).unwrap().name(), "tanh_f64");
        assert_eq!(KernelId::fill(DType::I32).unwrap().name(), "fill_i32");
        assert_eq!(KernelId::fused(BinaryOp::Sub, DType::F32).unwrap().name(), "fused_sub_f32");
        assert_eq!(KernelId::reduce(ReduceOp::AbsSum, DType::F32).unwrap().name(), "reduce_asum_f32");
    }

    #[test]
    fn test_float_map_on_integers_is_unsupported() {
        let err = KernelId::map(UnaryFunction::Sqrt, DType::I32).unwrap_err();
        assert!(matches!(
            err,
            LumenError::UnsupportedOperation { ref operation, dtype: DType::I32 } if operation == "sqrt"
        ));
        assert!(KernelId::map(UnaryFunction::Abs, DType::I64).is_ok());
    }

    #[test]
    fn test_catalog_sizes() {
        // 4 ops x {binary, scalar, fused} + fill + 3 reductions + maps
        assert_eq!(KernelId::catalog(DType::F32).len(), 12 + 1 + 3 + 11);
        assert_eq!(KernelId::catalog(DType::I32).len(), 12 + 1 + 3 + 2);
    }

    #[test]
    fn test_from_name() {
        let id = KernelId::from_name("reduce_dot_f64").unwrap();
        assert_eq!(id.routine(), Routine::Reduce(ReduceOp::Dot));
        assert_eq!(id.dtype(), DType::F64);
        assert!(matches!(
            KernelId::from_name("sin_i32"),
            Err(LumenError::UnsupportedOperation { dtype: DType::I32, .. })
        ));
        assert!(KernelId::from_name("erf_f32").is_err());
        assert!(matches!(
            KernelId::from_name("add_u8"),
            Err(LumenError::UnknownKernel(ref name)) if name == "add_u8"
        ));
        assert!(matches!(KernelId::from_name("fill"), Err(LumenError::UnknownKernel(_))));
    }

    #[test]
    fn test_signatures_end_with_count() {
        for dtype in DTYPES {
            for id in KernelId::catalog(dtype) {
                assert_eq!(id.signature().params().last(), Some(&ParamKind::Int), "{}", id);
            }
        }
    }

    #[test]
    fn test_descriptor_table() {
        let d = OperationDescriptor::CompositeAssign(BinaryOp::Add, 2.0f32);
        assert_eq!(d.kernel().unwrap().name(), "fused_add_f32");
        assert_eq!(d.operand_count(), 2);
        assert_eq!(d.scalar(), Some(2.0));

        let r = OperationDescriptor::<i64>::Reduce(ReduceOp::Dot);
        assert_eq!(r.kernel().unwrap().name(), "reduce_dot_i64");
        assert_eq!(r.operand_count(), 2);
        assert_eq!(r.scalar(), None);
    }

    #[test]
    fn test_lookup_function() {
        assert_eq!(lookup_function("exp", DType::F32).unwrap(), UnaryFunction::Exp);
        assert!(lookup_function("exp", DType::I32).is_err());
        assert!(lookup_function("gamma", DType::F64).is_err());
    }
}
