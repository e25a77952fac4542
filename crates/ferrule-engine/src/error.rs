//! Bridge error taxonomy
//!
//! Failures surface to callers as typed, foreign-equivalent signals.
//! Member lookups that simply find nothing return `Ok(None)` and never an
//! error; only construction-time and finish-time problems are hard
//! failures.

use thiserror::Error;

/// Typed failures of the runtime bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A foreign class could not be resolved
    #[error("class not resolvable: {0}")]
    ClassNotResolvable(String),

    /// A super type, interface, or member is not accessible from the
    /// requesting class
    #[error("illegal access: {0}")]
    IllegalAccess(String),

    /// The declared hierarchy is not satisfiable (extending an interface,
    /// implementing a non-interface, inheriting a final class)
    #[error("incompatible hierarchy: {0}")]
    IncompatibleHierarchy(String),

    /// A verification rule was violated (e.g. overriding a final method)
    #[error("verification failure: {0}")]
    VerificationFailure(String),

    /// A required concrete method has no implementation
    #[error("abstract method missing: {0}")]
    AbstractMethodMissing(String),

    /// Reflective invocation received arguments of the wrong shape
    #[error("argument shape mismatch: {0}")]
    ArgumentShapeMismatch(String),

    /// Invoked code threw; the inner cause is preserved
    #[error("invocation failure")]
    InvocationFailure(#[source] Box<BridgeError>),

    /// An operation was requested in a state that cannot serve it
    /// (e.g. any capability of an unloadable placeholder)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A runtime cast failed
    #[error("class cast: {0}")]
    ClassCast(String),

    /// A null receiver or reference was dereferenced
    #[error("null reference")]
    NullReference,

    /// A native method has no binding (or native stubs are disabled)
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Bridge result alias
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Wrap an error thrown by invoked code, preserving the cause.
    pub fn invocation(inner: BridgeError) -> BridgeError {
        BridgeError::InvocationFailure(Box::new(inner))
    }

    /// The inner cause of an invocation failure, if this is one.
    pub fn invocation_cause(&self) -> Option<&BridgeError> {
        match self {
            BridgeError::InvocationFailure(inner) => Some(inner),
            _ => None,
        }
    }
}
