//! Error types for bridge operations
//!
//! Host error codes never cross this boundary as-is: they are flattened into
//! message-level variants so callers only ever match on [`JsbError`].

use jsb_host::{HostError, NativePtr};
use thiserror::Error;

/// Result type alias for bridge operations
pub type JsbResult<T> = Result<T, JsbError>;

/// Errors reported by the bridge
#[derive(Debug, Error)]
pub enum JsbError {
    /// The host could not allocate the requested value
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// Script code threw; the pending exception has already been cleared
    #[error("{error_type}: {message}")]
    Script {
        error_type: String,
        message: String,
        stack: Option<String>,
    },

    /// Operation requires a value of a different kind
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// The wrapper has been cleaned up and no longer talks to the host
    #[error("Object has been cleaned up")]
    CleanedUp,

    /// No engine is running on this thread, or it is tearing down
    #[error("Script engine is not running")]
    EngineNotRunning,

    /// `ScriptEngine::init` was called twice on one thread
    #[error("Script engine is already running on this thread")]
    EngineAlreadyRunning,

    /// Private data can only be attached once
    #[error("Private data is already set on this object")]
    PrivateDataAlreadySet,

    /// The native pointer is registered to another live wrapper
    #[error("Native pointer {0} is already bound to another object")]
    NativePtrAlreadyBound(NativePtr),

    /// A global capability the operation relies on is missing
    #[error("Missing capability: {0}")]
    MissingCapability(String),

    /// Other host failure
    #[error("Host error: {0}")]
    Host(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JsbError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a script exception
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::Script { .. })
    }

    /// Get the stack trace if available
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::Script { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    /// Get the error type name (e.g., "TypeError", "SyntaxError")
    pub fn error_type(&self) -> &str {
        match self {
            Self::Script { error_type, .. } => error_type,
            Self::Allocation(_) => "AllocationError",
            Self::TypeError { .. } => "TypeError",
            Self::CleanedUp => "CleanedUpError",
            Self::EngineNotRunning | Self::EngineAlreadyRunning => "EngineError",
            Self::PrivateDataAlreadySet | Self::NativePtrAlreadyBound(_) => "BindingError",
            Self::MissingCapability(_) => "CapabilityError",
            Self::Host(_) => "HostError",
            Self::Json(_) => "JsonError",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl From<HostError> for JsbError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::OutOfMemory { .. } => Self::Allocation(err.to_string()),
            HostError::Disposed => Self::EngineNotRunning,
            HostError::TypeMismatch { expected, actual } => {
                Self::type_error(expected, actual.name())
            }
            HostError::Exception(message) => Self::script_error("Error", message),
            other => Self::Host(other.to_string()),
        }
    }
}
