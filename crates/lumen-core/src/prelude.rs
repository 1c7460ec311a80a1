//! Convenience re-exports for common lumen-core types.
//!
//! ```rust
//! use lumen_core::prelude::*;
//! ```

pub use crate::argument::{ArgumentList, KernelArgument};
pub use crate::ops::descriptor::{BinaryOp, KernelId, OperationDescriptor, ReduceOp, UnaryFunction};
pub use crate::DType;
pub use crate::Device;
pub use crate::DeviceArray;
pub use crate::DeviceValue;
pub use crate::EngineConfig;
pub use crate::LumenError;
pub use crate::Result;
