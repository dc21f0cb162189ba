//! Error taxonomy for the bridge.
//!
//! Every failure a native call site can observe maps onto one [`BridgeError`]
//! variant. Only [`BridgeError::UnknownHandle`] is recoverable: it is logged and
//! downgraded to a "no result" sentinel by the call frame, because the hosting
//! simulator keeps running after a misused handle. Everything else aborts the
//! call's forward progress.

use pyo3::PyErr;

use crate::registry::Handle;

/// Result alias used across the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while marshaling a call across the native/Python boundary.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The handle is not in the object registry: never issued, or already destroyed.
    #[error("no live object for handle {handle}")]
    UnknownHandle { handle: Handle },

    /// Python code raised while being evaluated or called.
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] PyErr),

    /// A multi-value result did not have exactly one element per out-parameter.
    #[error("invalid return tuple size: expected {expected}, got {actual}")]
    InvalidArity { expected: usize, actual: usize },

    /// A native array has no linear addressable backing.
    #[error("array type does not have native C representation: {0}")]
    UnsupportedRepresentation(String),

    /// A Python value could not convert to the declared native type.
    #[error("cannot convert result to `{expected}`: {source}")]
    TypeMismatch {
        expected: String,
        #[source]
        source: PyErr,
    },

    /// A module or attribute along a dotted import path could not be resolved.
    #[error("unable to import `{path}`: {source}")]
    Resolution {
        path: String,
        #[source]
        source: PyErr,
    },

    /// Every handle value has been issued; handles are never reused.
    #[error("object registry has run out of handles")]
    HandlesExhausted,

    /// The interpreter has been torn down; no bridge operation may run again.
    #[error("the interpreter has been finalized")]
    Finalized,

    /// Configuration was supplied after the interpreter booted.
    #[error("the interpreter is already running; configure before the first call")]
    AlreadyRunning,
}

impl BridgeError {
    /// Whether the error is the non-fatal lookup failure.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownHandle { .. })
    }

    /// Returns the Python exception behind this error, if there is one.
    #[must_use]
    pub fn py_err(&self) -> Option<&PyErr> {
        match self {
            Self::Evaluation(err) | Self::TypeMismatch { source: err, .. } | Self::Resolution { source: err, .. } => {
                Some(err)
            }
            _ => None,
        }
    }
}

impl From<PyErr> for BridgeError {
    fn from(err: PyErr) -> Self {
        Self::Evaluation(err)
    }
}
