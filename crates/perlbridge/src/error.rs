//! Error Types for the Bridge
//!
//! ## Error Categories
//!
//! - Package loading failures (`require` could not find or compile it)
//! - Foreign runtime errors (a `die`, or `$@` left set after a call)
//! - Type conversion errors (no representation on the other side)
//! - Lifecycle errors (use of a session or handle after shutdown)
//! - Configuration errors
//!
//! Conversion errors are local and recoverable: retry with a coerced value.
//! Lifecycle errors indicate a programming mistake and should not be
//! retried.

use thiserror::Error;

use crate::value::HostValue;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
///
/// A `ForeignRuntime` error may carry the interpreter's error value, which
/// holds handles into the session. Such errors are neither `Send` nor
/// `Sync`; strip the payload with [`without_value`](Self::without_value)
/// and render it with `to_string()` before crossing threads.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// A package could not be found or failed to compile
    #[error("cannot load package {package}: {message}")]
    ForeignLoad {
        /// Package name passed to `load`
        package: String,
        /// The interpreter's diagnostic
        message: String,
    },

    /// Foreign code died, or left `$@` set after a call
    #[error("foreign runtime error: {message}")]
    ForeignRuntime {
        /// Stringified error value
        message: String,
        /// The original error value, when it could be converted
        value: Option<Box<HostValue>>,
    },

    /// A value has no representation on the other side
    #[error("type conversion failed: cannot convert {from_type} to {to_type}: {reason}")]
    TypeConversion {
        /// Source type name
        from_type: String,
        /// Target type name
        to_type: String,
        /// Reason for failure
        reason: String,
    },

    /// Operation attempted in the wrong session state
    #[error("{operation}: {reason}")]
    Lifecycle {
        /// The operation that was attempted
        operation: String,
        /// Why it cannot run
        reason: String,
    },

    /// Invalid session configuration
    #[error("invalid session configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Create a package load error
    pub fn load_failed(package: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::ForeignLoad {
            package: package.into(),
            message: message.into(),
        }
    }

    /// Create a foreign runtime error without an error value
    pub fn runtime(message: impl Into<String>) -> Self {
        BridgeError::ForeignRuntime {
            message: message.into(),
            value: None,
        }
    }

    /// Create a foreign runtime error carrying the original error value
    pub fn runtime_with_value(message: impl Into<String>, value: HostValue) -> Self {
        BridgeError::ForeignRuntime {
            message: message.into(),
            value: Some(Box::new(value)),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(
        from_type: impl Into<String>,
        to_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BridgeError::TypeConversion {
            from_type: from_type.into(),
            to_type: to_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a type mismatch error for typed extraction
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        let actual = actual.into();
        BridgeError::type_conversion(actual, expected, "type mismatch")
    }

    /// Create a lifecycle error
    pub fn lifecycle(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Lifecycle {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config(message.into())
    }

    /// Check if this is a package load error
    pub fn is_load_error(&self) -> bool {
        matches!(self, BridgeError::ForeignLoad { .. })
    }

    /// Check if this is a foreign runtime error
    pub fn is_runtime_error(&self) -> bool {
        matches!(self, BridgeError::ForeignRuntime { .. })
    }

    /// Check if this is a type conversion error
    pub fn is_type_error(&self) -> bool {
        matches!(self, BridgeError::TypeConversion { .. })
    }

    /// Check if this is a lifecycle error
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self, BridgeError::Lifecycle { .. })
    }

    /// The original foreign error value, if one was captured
    pub fn foreign_value(&self) -> Option<&HostValue> {
        match self {
            BridgeError::ForeignRuntime { value, .. } => value.as_deref(),
            _ => None,
        }
    }

    /// Drop the captured foreign value, releasing any handles it holds
    pub fn without_value(self) -> Self {
        match self {
            BridgeError::ForeignRuntime { message, .. } => {
                BridgeError::ForeignRuntime { message, value: None }
            }
            other => other,
        }
    }
}
