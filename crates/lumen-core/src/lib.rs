//! # lumen-core
//!
//! Device-resident arrays with host value semantics.
//!
//! Provides:
//! - `DeviceArray<T>` / `DeviceValue<T>`: O(1) clones sharing one
//!   reference-counted `DeviceBuffer`, copied on first mutation
//! - A closed catalog of elementwise, transform and reduction operations
//!   dispatched through one descriptor table
//! - Signature-checked kernel argument marshaling
//! - A `ComputeBackend` contract with a host reference backend and a CUDA
//!   backend (behind `cuda` feature flag)

pub mod dtype;
pub mod config;
pub mod backend;
pub mod buffer;
pub mod argument;
pub mod device;
pub mod array;
pub mod value;
pub mod ops;
pub mod error;
pub mod prelude;

pub use array::DeviceArray;
pub use buffer::DeviceBuffer;
pub use config::EngineConfig;
pub use device::Device;
pub use dtype::{DType, Element};
pub use error::LumenError;
pub use value::DeviceValue;

pub type Result<T> = std::result::Result<T, LumenError>;
