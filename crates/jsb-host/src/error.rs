//! Error types reported by host runtimes

use thiserror::Error;

use crate::value::{ObjectRef, ValueType};

/// Result type alias for host operations
pub type HostResult<T> = Result<T, HostError>;

/// Failures a host runtime reports back across the capability boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// The heap cannot hold another object
    #[error("Out of memory: heap limit of {limit} objects reached")]
    OutOfMemory { limit: usize },

    /// The handle does not name a live object (collected or never allocated)
    #[error("Invalid handle: {0}")]
    InvalidHandle(ObjectRef),

    /// The runtime has been disposed
    #[error("Runtime has been disposed")]
    Disposed,

    /// Script code threw; the thrown value is now the pending exception
    #[error("Uncaught exception: {0}")]
    Exception(String),

    /// The operation needs a value of a different kind
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: ValueType,
    },

    /// Argument rejected by the host
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl HostError {
    /// Create a type mismatch error
    pub fn type_mismatch(expected: &'static str, actual: ValueType) -> Self {
        Self::TypeMismatch { expected, actual }
    }

    /// Check if this error left a pending exception behind
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }
}
