//! Kernel argument marshaling.
//!
//! A launch receives an ordered slice of [`KernelArgument`]s that must match
//! the kernel's [`KernelSignature`] position by position. [`ArgumentList`]
//! checks every argument as it is pushed, so a mismatched list never reaches
//! a backend.

use std::fmt;

use smallvec::SmallVec;

use crate::array::DeviceArray;
use crate::backend::BufferHandle;
use crate::buffer::DeviceBuffer;
use crate::dtype::{DType, Element};
use crate::ops::descriptor::{KernelId, Routine};
use crate::{LumenError, Result};

/// A host scalar in a fixed 8-byte slot, tagged with its element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarPayload {
    dtype: DType,
    bytes: [u8; 8],
}

impl ScalarPayload {
    pub fn new<T: Element>(value: T) -> Self {
        let mut bytes = [0u8; 8];
        let raw = bytemuck::bytes_of(&value);
        bytes[..raw.len()].copy_from_slice(raw);
        Self { dtype: T::DTYPE, bytes }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The value as `T`, or `None` if it was marshaled from another type.
    pub fn get<T: Element>(&self) -> Option<T> {
        if T::DTYPE != self.dtype {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(self.as_bytes()))
    }

    /// The value's bytes, `element_size` long.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.dtype.element_size()]
    }

    /// The whole slot, value bits first in memory order.
    pub fn to_slot(&self) -> u64 {
        u64::from_ne_bytes(self.bytes)
    }
}

/// A borrowed device buffer a kernel reads.
///
/// Only this crate can construct one; the public path is
/// [`KernelArgument::input`]. Writable buffers are [`DeviceMutPtr`]s.
#[derive(Debug, Clone, Copy)]
pub struct DevicePtr<'a> {
    buffer: &'a DeviceBuffer,
}

impl<'a> DevicePtr<'a> {
    pub(crate) fn new(buffer: &'a DeviceBuffer) -> Self {
        Self { buffer }
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    /// Element count of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// A borrowed device buffer a kernel writes.
///
/// The public path is [`KernelArgument::output`], which passes the array
/// through its copy-on-write gate first, so the buffer is never shared with
/// another array while this borrow lives. A read-only pointer cannot be
/// turned into a writable one:
///
/// ```compile_fail
/// use lumen_core::prelude::*;
///
/// let device = Device::host();
/// let a = DeviceArray::from_slice(&device, &[1.0f32])?;
/// let KernelArgument::ConstPointer(p) = KernelArgument::input(&a) else { unreachable!() };
/// let _ = KernelArgument::MutPointer(p);
/// # Ok::<(), lumen_core::LumenError>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DeviceMutPtr<'a> {
    buffer: &'a DeviceBuffer,
}

impl<'a> DeviceMutPtr<'a> {
    /// Caller guarantees `buffer` is uniquely owned by the destination.
    pub(crate) fn new(buffer: &'a DeviceBuffer) -> Self {
        Self { buffer }
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// One marshaled kernel parameter.
#[derive(Debug, Clone, Copy)]
pub enum KernelArgument<'a> {
    Scalar(ScalarPayload),
    ConstPointer(DevicePtr<'a>),
    MutPointer(DeviceMutPtr<'a>),
    Int(i64),
}

impl<'a> KernelArgument<'a> {
    pub fn scalar<T: Element>(value: T) -> Self {
        KernelArgument::Scalar(ScalarPayload::new(value))
    }

    /// Read-only view of an array's buffer.
    pub fn input<T: Element>(array: &'a DeviceArray<T>) -> Self {
        KernelArgument::ConstPointer(DevicePtr::new(array.buffer()))
    }

    /// Writable view of an array's buffer.
    ///
    /// This is a mutating entry point: a shared buffer is copied first so the
    /// kernel never writes through another array's storage.
    pub fn output<T: Element>(array: &'a mut DeviceArray<T>) -> Result<Self> {
        let buffer = array.make_unique()?;
        Ok(KernelArgument::MutPointer(DeviceMutPtr::new(buffer)))
    }

    pub fn int(value: i64) -> Self {
        KernelArgument::Int(value)
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            KernelArgument::Scalar(p) => ParamKind::Scalar(p.dtype()),
            KernelArgument::ConstPointer(p) => ParamKind::ConstPointer(p.dtype()),
            KernelArgument::MutPointer(p) => ParamKind::MutPointer(p.dtype()),
            KernelArgument::Int(_) => ParamKind::Int,
        }
    }

    pub(crate) fn read(buffer: &'a DeviceBuffer) -> Self {
        KernelArgument::ConstPointer(DevicePtr::new(buffer))
    }

    /// Caller guarantees `buffer` is uniquely owned by the destination.
    pub(crate) fn write(buffer: &'a DeviceBuffer) -> Self {
        KernelArgument::MutPointer(DeviceMutPtr::new(buffer))
    }

    /// Element count of a pointer argument's buffer.
    fn buffer_len(&self) -> Option<usize> {
        match self {
            KernelArgument::ConstPointer(p) => Some(p.len()),
            KernelArgument::MutPointer(p) => Some(p.len()),
            KernelArgument::Scalar(_) | KernelArgument::Int(_) => None,
        }
    }
}

/// Declared type of one kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Scalar(DType),
    ConstPointer(DType),
    MutPointer(DType),
    Int,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Scalar(d) => write!(f, "{}", d),
            ParamKind::ConstPointer(d) => write!(f, "const {}*", d),
            ParamKind::MutPointer(d) => write!(f, "{}*", d),
            ParamKind::Int => write!(f, "i64"),
        }
    }
}

/// Ordered parameter list of a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    params: SmallVec<[ParamKind; 6]>,
}

impl KernelSignature {
    pub fn new(params: &[ParamKind]) -> Self {
        Self { params: SmallVec::from_slice(params) }
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Check the argument at `index` against the declared parameter.
    pub fn check(&self, kernel: &KernelId, index: usize, arg: &KernelArgument<'_>) -> Result<()> {
        let Some(&expected) = self.params.get(index) else {
            return Err(LumenError::ArgumentType {
                kernel: kernel.name(),
                index,
                detail: format!("kernel takes {} parameters", self.params.len()),
            });
        };
        let found = arg.kind();
        if found != expected {
            return Err(LumenError::ArgumentType {
                kernel: kernel.name(),
                index,
                detail: format!("expected {}, found {}", expected, found),
            });
        }
        Ok(())
    }

    /// Check a complete argument list: parameter types, then that every
    /// buffer covers the element count passed in the trailing `i64`.
    pub fn validate(&self, kernel: &KernelId, args: &[KernelArgument<'_>]) -> Result<()> {
        for (index, arg) in args.iter().enumerate() {
            self.check(kernel, index, arg)?;
        }
        if args.len() != self.params.len() {
            return Err(LumenError::ArgumentType {
                kernel: kernel.name(),
                index: args.len(),
                detail: format!("expected {} arguments, found {}", self.params.len(), args.len()),
            });
        }
        check_extents(kernel, args)
    }
}

/// The trailing element count of a complete argument list.
pub fn element_count(args: &[KernelArgument<'_>]) -> Option<i64> {
    match args.last() {
        Some(&KernelArgument::Int(n)) => Some(n),
        _ => None,
    }
}

// Reductions write one element; every other kernel reads and writes `n`.
fn check_extents(kernel: &KernelId, args: &[KernelArgument<'_>]) -> Result<()> {
    let Some(n) = element_count(args) else {
        return Ok(());
    };
    let count = usize::try_from(n).map_err(|_| LumenError::ArgumentType {
        kernel: kernel.name(),
        index: args.len() - 1,
        detail: format!("negative element count {}", n),
    })?;
    let reduce = matches!(kernel.routine(), Routine::Reduce(_));
    for (index, arg) in args.iter().enumerate() {
        let Some(len) = arg.buffer_len() else {
            continue;
        };
        let needed = match arg {
            KernelArgument::MutPointer(_) if reduce => 1,
            _ => count,
        };
        if len < needed {
            return Err(LumenError::ArgumentType {
                kernel: kernel.name(),
                index,
                detail: format!("buffer holds {} elements, launch covers {}", len, needed),
            });
        }
    }
    Ok(())
}

/// Builder for a kernel's argument list, validated push by push.
///
/// ```
/// use lumen_core::prelude::*;
///
/// let device = Device::host();
/// let x = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0])?;
/// let mut y = DeviceArray::<f32>::with_capacity(&device, 3)?;
///
/// let kernel = KernelId::map(UnaryFunction::Neg, DType::F32)?;
/// let args = ArgumentList::new(&kernel)
///     .input(&x)?
///     .output(&mut y)?
///     .int(3)?;
/// device.launch(args, 3)?;
/// assert_eq!(y.to_vec()?, vec![-1.0, -2.0, -3.0]);
/// # Ok::<(), lumen_core::LumenError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ArgumentList<'a> {
    kernel: KernelId,
    signature: KernelSignature,
    args: SmallVec<[KernelArgument<'a>; 6]>,
}

impl<'a> ArgumentList<'a> {
    pub fn new(kernel: &KernelId) -> Self {
        Self {
            kernel: *kernel,
            signature: kernel.signature(),
            args: SmallVec::new(),
        }
    }

    /// Append the next argument; fails if it does not match the parameter
    /// declared at this position.
    pub fn push(mut self, arg: KernelArgument<'a>) -> Result<Self> {
        self.signature.check(&self.kernel, self.args.len(), &arg)?;
        self.args.push(arg);
        Ok(self)
    }

    pub fn scalar<T: Element>(self, value: T) -> Result<Self> {
        self.push(KernelArgument::scalar(value))
    }

    pub fn input<T: Element>(self, array: &'a DeviceArray<T>) -> Result<Self> {
        self.push(KernelArgument::input(array))
    }

    pub fn output<T: Element>(self, array: &'a mut DeviceArray<T>) -> Result<Self> {
        let arg = KernelArgument::output(array)?;
        self.push(arg)
    }

    pub fn int(self, value: i64) -> Result<Self> {
        self.push(KernelArgument::Int(value))
    }

    pub fn kernel(&self) -> &KernelId {
        &self.kernel
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The element count pushed as the trailing `i64`, once supplied.
    pub fn element_count(&self) -> Option<i64> {
        if self.is_complete() {
            element_count(&self.args)
        } else {
            None
        }
    }

    /// Whether every declared parameter has been supplied.
    pub fn is_complete(&self) -> bool {
        self.args.len() == self.signature.len()
    }

    /// The validated arguments, ready for a backend.
    pub fn finish(self) -> Result<(KernelId, SmallVec<[KernelArgument<'a>; 6]>)> {
        self.signature.validate(&self.kernel, &self.args)?;
        Ok((self.kernel, self.args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::descriptor::{BinaryOp, KernelId, ReduceOp, UnaryFunction};
    use crate::Device;

    #[test]
    fn test_scalar_payload() {
        let p = ScalarPayload::new(2.5f32);
        assert_eq!(p.dtype(), DType::F32);
        assert_eq!(p.get::<f32>(), Some(2.5));
        assert_eq!(p.get::<f64>(), None);
        assert_eq!(p.as_bytes().len(), 4);
        assert_eq!(f32::from_ne_bytes(p.to_slot().to_ne_bytes()[..4].try_into().unwrap()), 2.5);

        let q = ScalarPayload::new(-7i64);
        assert_eq!(q.get::<i64>(), Some(-7));
        assert_eq!(q.to_slot() as i64, -7);
    }

    #[test]
    fn test_push_rejects_wrong_kind() {
        let device = Device::host();
        let x = DeviceArray::from_slice(&device, &[1.0f32, 2.0]).unwrap();
        let kernel = KernelId::scalar(BinaryOp::Add, DType::F32).unwrap();

        // add_scalar_f32(const f32* a, f32 s, f32* out, i64 n)
        let err = ArgumentList::new(&kernel).input(&x).unwrap().int(2).unwrap_err();
        match err {
            LumenError::ArgumentType { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_push_rejects_wrong_dtype() {
        let device = Device::host();
        let x = DeviceArray::from_slice(&device, &[1.0f64, 2.0]).unwrap();
        let kernel = KernelId::scalar(BinaryOp::Add, DType::F32).unwrap();
        assert!(matches!(
            ArgumentList::new(&kernel).input(&x),
            Err(LumenError::ArgumentType { index: 0, .. })
        ));
    }

    #[test]
    fn test_finish_requires_all_params() {
        let device = Device::host();
        let x = DeviceArray::from_slice(&device, &[1i32, 2]).unwrap();
        let kernel = KernelId::scalar(BinaryOp::Mul, DType::I32).unwrap();
        let partial = ArgumentList::new(&kernel).input(&x).unwrap().scalar(3i32).unwrap();
        assert!(!partial.is_complete());
        assert!(matches!(partial.finish(), Err(LumenError::ArgumentType { index: 2, .. })));
    }

    #[test]
    fn test_too_many_arguments() {
        let device = Device::host();
        let mut out = DeviceArray::<f32>::with_capacity(&device, 2).unwrap();
        let kernel = KernelId::fill(DType::F32).unwrap();
        let list = ArgumentList::new(&kernel)
            .output(&mut out)
            .unwrap()
            .scalar(1.0f32)
            .unwrap()
            .int(2)
            .unwrap();
        assert!(list.is_complete());
        assert!(list.int(5).is_err());
    }

    #[test]
    fn test_finish_checks_buffer_extents() {
        let device = Device::host();
        let x = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let mut out = DeviceArray::<f32>::with_capacity(&device, 2).unwrap();
        let kernel = KernelId::map(UnaryFunction::Exp, DType::F32).unwrap();

        let list = ArgumentList::new(&kernel).input(&x).unwrap().output(&mut out).unwrap().int(4).unwrap();
        assert_eq!(list.element_count(), Some(4));
        match list.finish() {
            Err(LumenError::ArgumentType { index, detail, .. }) => {
                assert_eq!(index, 1);
                assert!(detail.contains("holds 2"), "{}", detail);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        let negative = ArgumentList::new(&kernel).input(&x).unwrap().output(&mut out).unwrap().int(-1).unwrap();
        assert!(matches!(negative.finish(), Err(LumenError::ArgumentType { index: 2, .. })));
    }

    #[test]
    fn test_reduction_output_holds_one_element() {
        let device = Device::host();
        let x = DeviceArray::from_slice(&device, &[1i64, 2, 3]).unwrap();
        let mut out = DeviceArray::<i64>::with_capacity(&device, 1).unwrap();
        let kernel = KernelId::reduce(ReduceOp::Dot, DType::I64).unwrap();
        let list = ArgumentList::new(&kernel)
            .input(&x)
            .unwrap()
            .input(&x)
            .unwrap()
            .output(&mut out)
            .unwrap()
            .int(3)
            .unwrap();
        assert!(list.finish().is_ok());
    }

    #[test]
    fn test_output_pointer_is_unshared() {
        let device = Device::host();
        let a = DeviceArray::from_slice(&device, &[1i32, 2]).unwrap();
        let mut b = a.clone();
        let arg = KernelArgument::output(&mut b).unwrap();
        let KernelArgument::MutPointer(p) = arg else {
            panic!("expected a writable pointer, got {:?}", arg.kind());
        };
        assert_ne!(p.handle(), a.buffer().handle());
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_param_kind_display() {
        assert_eq!(ParamKind::ConstPointer(DType::F32).to_string(), "const f32*");
        assert_eq!(ParamKind::MutPointer(DType::I64).to_string(), "i64*");
        assert_eq!(ParamKind::Int.to_string(), "i64");
    }
}
