//! Error types shared across the islet workspace.

use crate::value::Value;
use thiserror::Error;

/// Errors surfaced by isolate, value, and cross-isolate operations.
///
/// The first four variants are the caller-facing kinds; the remaining ones
/// are engine-level signals that are translated before they cross an isolate
/// boundary. `Display` prefixes the kind; [`Error::message`] returns the
/// bare message text, which is what API-level tests assert on.
#[derive(Debug, Error)]
pub enum Error {
    /// Contract violation by the caller (wrong kind of argument, wrong
    /// isolate, calling a non-function).
    #[error("TypeError: {0}")]
    Type(String),

    /// Lifecycle violation (released handle, double use, script timeout).
    #[error("Error: {0}")]
    Generic(String),

    /// A script exception propagated into the calling isolate.
    #[error("RuntimeError: {message}")]
    Runtime {
        message: String,
        stack: Option<String>,
    },

    /// Engine failure (unserializable value, thread spawn failure).
    #[error("InternalError: {0}")]
    Internal(String),

    /// A script exception still inside its home isolate. Converted to
    /// [`Error::Runtime`] before crossing an isolate boundary.
    #[error("Uncaught script exception")]
    Thrown(Value),

    /// Execution observed a termination signal and unwound.
    #[error("Execution interrupted")]
    Interrupted,

    /// The isolate backing the operation is gone.
    #[error("Isolate is disposed")]
    Disposed,
}

impl Error {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn runtime(message: impl Into<String>, stack: Option<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            stack,
        }
    }

    /// The message text without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Type(m) | Self::Generic(m) | Self::Internal(m) => m.clone(),
            Self::Runtime { message, .. } => message.clone(),
            Self::Thrown(_) => "Uncaught script exception".to_string(),
            Self::Interrupted => "Execution interrupted".to_string(),
            Self::Disposed => "Isolate is disposed".to_string(),
        }
    }
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_kind() {
        let err = Error::type_error("Invalid `key`");
        assert_eq!(err.to_string(), "TypeError: Invalid `key`");
        assert_eq!(err.message(), "Invalid `key`");
    }

    #[test]
    fn runtime_keeps_stack_out_of_message() {
        let err = Error::runtime("boom", Some("at foo:1".to_string()));
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "RuntimeError: boom");
    }
}
