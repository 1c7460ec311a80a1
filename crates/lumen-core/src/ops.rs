//! Device array operations: arithmetic, transforms, reductions.
//!
//! Mutating methods work in place through the copy-on-write gate.
//! Non-mutating variants (`add`, `scaled`, ...) return new arrays.

pub mod descriptor;
pub mod engine;
pub mod arithmetic;
pub mod reduction;
