//! Endpoint error types.

use std::io;

use thiserror::Error;

use crate::lifecycle::EndpointState;

/// Result type alias using [`ServerError`].
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by endpoint construction and `bind`.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The requested port is outside 0–65535.
    #[error("The port number {port} is outside 0~65535, which is not a legal port number")]
    InvalidPort {
        /// The rejected value.
        port: i64,
    },

    /// The listening socket could not be opened.
    #[error("Listening on port {port} failed, check whether the port is occupied: {source}")]
    Bind {
        /// The requested port.
        port: u16,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// The blocking wait inside `bind` was cancelled by the caller.
    #[error("Listening on port {port} was interrupted")]
    BindInterrupted {
        /// The port that was being served.
        port: u16,
    },

    /// `bind` was called on an endpoint that is not unbound.
    #[error("Endpoint cannot bind while {state}")]
    InvalidState {
        /// The state observed.
        state: EndpointState,
    },

    /// A worker pool could not be started.
    #[error("Failed to start worker pool '{name}': {source}")]
    Pool {
        /// Pool name.
        name: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// A worker pool was already shut down when `bind` needed it.
    #[error("Worker pool '{name}' is shut down")]
    PoolShutdown {
        /// Pool name.
        name: String,
    },

    /// `bind` was called from a thread that is driving an async runtime.
    #[error("bind blocks the calling thread and cannot run inside an async runtime")]
    AsyncContext,

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` if the endpoint ended up closed because of this error.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidPort { .. }
                | Self::Bind { .. }
                | Self::BindInterrupted { .. }
                | Self::PoolShutdown { .. }
        )
    }
}
