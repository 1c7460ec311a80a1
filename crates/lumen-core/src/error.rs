use crate::DType;

/// Errors surfaced by device arrays, the operation engine and backends.
///
/// Every failure is returned to the immediate caller; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum LumenError {
    #[error("device allocation failed: {0}")]
    Allocation(String),

    #[error("device copy failed: {0}")]
    Copy(String),

    #[error("shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("unsupported operation '{operation}' for {dtype}")]
    UnsupportedOperation { operation: String, dtype: DType },

    #[error("no kernel named '{0}' in the catalog")]
    UnknownKernel(String),

    #[error("kernel launch failed: {0}")]
    Launch(String),

    #[error("argument {index} of kernel '{kernel}': {detail}")]
    ArgumentType {
        kernel: String,
        index: usize,
        detail: String,
    },

    #[error("index {index} out of bounds for array of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("operands live on different devices ({left} vs {right})")]
    DeviceMismatch { left: String, right: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
