//! Error types for chain construction and per-connection processing.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building a handler chain or running one.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Two registered handlers share the same explicit name.
    #[error("Duplicate handler name: {name}")]
    DuplicateHandlerName {
        /// The colliding name.
        name: String,
    },

    /// A frame exceeded the configured maximum length.
    #[error("Frame of {length} bytes exceeds the maximum of {max} bytes")]
    FrameTooLong {
        /// Length announced or produced.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A handler stage failed while processing a frame.
    #[error("Handler '{stage}' failed: {message}")]
    Handler {
        /// Name of the failing stage, or its position when anonymous.
        stage: String,
        /// Human-readable error message.
        message: String,
    },

    /// Transport failure on the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Creates a handler error for the given stage.
    pub fn handler(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error came from the transport.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_display() {
        let err = CoreError::DuplicateHandlerName {
            name: "auth".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate handler name: auth");
    }

    #[test]
    fn test_frame_too_long_display() {
        let err = CoreError::FrameTooLong { length: 10, max: 4 };
        assert!(err.to_string().contains("10 bytes"));
        assert!(err.to_string().contains("4 bytes"));
    }

    #[test]
    fn test_handler_constructor() {
        let err = CoreError::handler("log", "boom");
        assert_eq!(err.to_string(), "Handler 'log' failed: boom");
        assert!(!err.is_io());
    }

    #[test]
    fn test_io_from() {
        let err: CoreError = std::io::Error::other("reset").into();
        assert!(err.is_io());
    }
}
