//! Error types for Strand.
//!
//! Every variant here is a programming error: it is surfaced to the caller
//! immediately and nothing in the core retries or falls back.

use thiserror::Error;

/// All Strand errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A tracked evaluation was started while another one was active.
    #[error("dependency tracking is already active; nested tracking requires a no-track scope")]
    ReentrantTracking,

    /// An atom or select was used before its store assigned it a name.
    #[error("{operation} used illegally: not yet initialized by a store")]
    Uninitialized {
        /// The operation that was attempted (`get`, `set`, `sub`, ...).
        operation: &'static str,
    },

    /// Two members of one store resolved to the same key.
    #[error("duplicate name in store: {0}")]
    DuplicateName(String),

    /// A path traversal hit a non-container value before its last fragment.
    #[error("cannot traverse path `{path}`: cannot descend into `{fragment}` through a non-container value")]
    PathStructure {
        /// The full path being accessed.
        path: String,
        /// The fragment at which traversal failed.
        fragment: String,
    },

    /// `set` was called on a select created without a setter.
    #[error("select `{0}` is read-only")]
    ReadOnly(String),

    /// A selector or derived computation failed.
    #[error("selector failed: {0}")]
    Selector(String),

    /// Typed access through serde failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Strand operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a selector failure from any displayable message.
    pub fn selector(message: impl std::fmt::Display) -> Self {
        Error::Selector(message.to_string())
    }

    /// Check if this is the re-entrant tracking guard firing.
    pub fn is_reentrant(&self) -> bool {
        matches!(self, Error::ReentrantTracking)
    }

    /// Check if this error comes from using a member before store setup.
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Error::Uninitialized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_names_operation() {
        let err = Error::Uninitialized { operation: "sub" };
        assert_eq!(err.to_string(), "sub used illegally: not yet initialized by a store");
        assert!(err.is_uninitialized());
    }

    #[test]
    fn path_error_names_fragment() {
        let err = Error::PathStructure {
            path: "A.B".into(),
            fragment: "B".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot traverse path `A.B`: cannot descend into `B` through a non-container value"
        );
    }

    #[test]
    fn serde_errors_convert() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("\"x\"");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
