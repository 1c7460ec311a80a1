//! Descriptor-driven launches.
//!
//! [`ElementwiseEngine::apply`] turns one [`OperationDescriptor`] into one
//! backend launch. Every check that can fail without side effects (catalog
//! lookup, operand count, shapes, devices) runs before the copy-on-write
//! gate, so a rejected call leaves the destination untouched and still shared.

use smallvec::SmallVec;

use crate::argument::KernelArgument;
use crate::array::DeviceArray;
use crate::dtype::Element;
use crate::ops::descriptor::{KernelId, OperationDescriptor, ReduceOp};
use crate::{Device, LumenError, Result};

/// Translates operation descriptors into launches on one device.
#[derive(Debug, Clone)]
pub struct ElementwiseEngine {
    device: Device,
}

impl ElementwiseEngine {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run `descriptor` writing into `dest`.
    ///
    /// `sources` holds the operands besides the destination: the right-hand
    /// side of a binary op, `[left, right]` of a composite assignment, or the
    /// one or two inputs of a reduction (whose `dest` must hold one element).
    pub fn apply<T: Element>(
        &self,
        descriptor: OperationDescriptor<T>,
        dest: &mut DeviceArray<T>,
        sources: &[&DeviceArray<T>],
    ) -> Result<()> {
        let kernel = descriptor.kernel()?;
        if sources.len() != descriptor.operand_count() {
            return Err(LumenError::ArgumentType {
                kernel: kernel.name(),
                index: sources.len(),
                detail: format!(
                    "expected {} source arrays, got {}",
                    descriptor.operand_count(),
                    sources.len()
                ),
            });
        }

        let is_reduce = matches!(descriptor, OperationDescriptor::Reduce(_));
        let count = if is_reduce {
            if dest.len() != 1 {
                return Err(LumenError::ShapeMismatch { expected: 1, actual: dest.len() });
            }
            sources[0].len()
        } else {
            dest.len()
        };
        for source in sources {
            if source.len() != count {
                return Err(LumenError::ShapeMismatch { expected: count, actual: source.len() });
            }
        }
        self.check_device(dest)?;
        for source in sources {
            self.check_device(source)?;
        }

        if count == 0 {
            if is_reduce {
                dest.set(0, T::ZERO)?;
            }
            return Ok(());
        }

        let n = i64::try_from(count)
            .map_err(|_| LumenError::Launch(format!("{}: {} elements exceed i64", kernel, count)))?;
        dest.make_unique()?;
        let out = dest.buffer();
        let args: SmallVec<[KernelArgument<'_>; 6]> = match descriptor {
            OperationDescriptor::ElementwiseBinary(_) => smallvec::smallvec![
                KernelArgument::read(out),
                KernelArgument::input(sources[0]),
                KernelArgument::write(out),
                KernelArgument::int(n),
            ],
            OperationDescriptor::ElementwiseScalar(_, s) => smallvec::smallvec![
                KernelArgument::read(out),
                KernelArgument::scalar(s),
                KernelArgument::write(out),
                KernelArgument::int(n),
            ],
            OperationDescriptor::Map(_) => smallvec::smallvec![
                KernelArgument::read(out),
                KernelArgument::write(out),
                KernelArgument::int(n),
            ],
            OperationDescriptor::Fill(value) => smallvec::smallvec![
                KernelArgument::write(out),
                KernelArgument::scalar(value),
                KernelArgument::int(n),
            ],
            OperationDescriptor::CompositeAssign(_, scale) => smallvec::smallvec![
                KernelArgument::input(sources[0]),
                KernelArgument::input(sources[1]),
                KernelArgument::scalar(scale),
                KernelArgument::write(out),
                KernelArgument::int(n),
            ],
            OperationDescriptor::Reduce(_) => {
                let mut args: SmallVec<[KernelArgument<'_>; 6]> =
                    sources.iter().map(|s| KernelArgument::input(*s)).collect();
                args.push(KernelArgument::write(out));
                args.push(KernelArgument::int(n));
                args
            }
        };
        self.device.submit(&kernel, count, &args)
    }

    /// Reduce `x` (and `y` for [`ReduceOp::Dot`]) to a host scalar.
    ///
    /// Launches into a one-element scratch buffer and synchronizes; this is
    /// the engine's only blocking call. Empty inputs reduce to zero without
    /// a launch.
    pub fn reduce<T: Element>(&self, op: ReduceOp, x: &DeviceArray<T>, y: Option<&DeviceArray<T>>) -> Result<T> {
        let mut sources: SmallVec<[&DeviceArray<T>; 2]> = SmallVec::new();
        sources.push(x);
        sources.extend(y);
        let kernel = KernelId::reduce(op, T::DTYPE)?;
        if sources.len() != op.arity() {
            return Err(LumenError::ArgumentType {
                kernel: kernel.name(),
                index: sources.len(),
                detail: format!("expected {} source arrays, got {}", op.arity(), sources.len()),
            });
        }
        if let Some(y) = y {
            if y.len() != x.len() {
                return Err(LumenError::ShapeMismatch { expected: x.len(), actual: y.len() });
            }
        }
        if x.is_empty() {
            return Ok(T::ZERO);
        }

        let mut scratch = DeviceArray::<T>::with_capacity(&self.device, 1)?;
        self.apply(OperationDescriptor::Reduce(op), &mut scratch, &sources)?;
        self.device.synchronize()?;
        scratch.get(0)
    }

    fn check_device<T: Element>(&self, array: &DeviceArray<T>) -> Result<()> {
        if !self.device.same_stream(array.device()) {
            return Err(LumenError::DeviceMismatch {
                left: self.device.to_string(),
                right: array.device().to_string(),
            });
        }
        Ok(())
    }
}
