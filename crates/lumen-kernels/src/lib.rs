//! # lumen-kernels
//!
//! Kernel implementations behind Lumen's closed operation catalog.
//!
//! Provides:
//! - The catalog vocabulary (`BinaryOp`, `UnaryFunction`, `ReduceOp`)
//! - Host elementwise and reduction kernels, split across rayon above a size threshold
//! - CUDA plumbing: device registry, device heap, NVRTC module cache and raw
//!   launches over the catalog source (behind `cuda` feature flag)

pub mod op;
pub mod scalar;
pub mod cpu_elementwise;
pub mod cpu_reduce;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use op::{BinaryOp, ReduceOp, UnaryFunction};
pub use scalar::KernelScalar;
