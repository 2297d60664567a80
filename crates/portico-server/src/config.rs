//! Endpoint configuration.
//!
//! Configuration is built with the builder pattern, or loaded from a TOML or
//! JSON file and then adjusted with `PORTICO_*` environment variables.
//!
//! # Example
//!
//! ```rust
//! use portico_server::EndpointConfig;
//!
//! let config = EndpointConfig::builder()
//!     .host("127.0.0.1")
//!     .io_threads(4)
//!     .build();
//!
//! assert_eq!(config.host(), "127.0.0.1");
//! assert!(config.tcp_nodelay());
//! ```

use std::path::Path;
use std::time::Duration;

use portico_core::DEFAULT_MAX_FRAME_LENGTH;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u32 = 8080;

/// Default number of acceptor threads.
pub const DEFAULT_ACCEPTOR_THREADS: usize = 1;

/// Default pause after a failed `accept`, in milliseconds.
pub const DEFAULT_ACCEPT_BACKOFF_MS: u64 = 100;

/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME: &str = "portico";

/// Settings for one server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Address the listener binds to.
    host: String,

    /// Port used by callers that bind from configuration.
    port: u32,

    /// Threads in the acceptor pool (0 = one per core).
    acceptor_threads: usize,

    /// Threads in the I/O pool (0 = one per core).
    io_threads: usize,

    /// Whether accepted sockets disable Nagle's algorithm.
    tcp_nodelay: bool,

    /// Largest frame payload the default framing accepts.
    max_frame_length: usize,

    /// Pause after a failed `accept` before trying again.
    accept_backoff_ms: u64,

    /// Prefix for worker thread names.
    thread_name: String,
}

impl EndpointConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> EndpointConfigBuilder {
        EndpointConfigBuilder::default()
    }

    /// Loads configuration from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => Self::from_toml_str(&content),
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid JSON: {e}"))),
            _ => Err(ServerError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ServerResult<Self> {
        toml::from_str(content).map_err(|e| ServerError::config(format!("invalid TOML: {e}")))
    }

    /// Applies `PORTICO_*` environment variable overrides.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("PORTICO_HOST") {
            self.host = host;
        }

        if let Ok(port) = std::env::var("PORTICO_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }

        if let Ok(threads) = std::env::var("PORTICO_ACCEPTOR_THREADS") {
            if let Ok(threads) = threads.parse() {
                self.acceptor_threads = threads;
            }
        }

        if let Ok(threads) = std::env::var("PORTICO_IO_THREADS") {
            if let Ok(threads) = threads.parse() {
                self.io_threads = threads;
            }
        }

        if let Ok(max) = std::env::var("PORTICO_MAX_FRAME_LENGTH") {
            if let Ok(max) = max.parse() {
                self.max_frame_length = max;
            }
        }

        if let Ok(nodelay) = std::env::var("PORTICO_TCP_NODELAY") {
            if let Ok(nodelay) = nodelay.parse() {
                self.tcp_nodelay = nodelay;
            }
        }

        self
    }

    /// Checks values that would only fail later, at bind time.
    pub fn validate(&self) -> ServerResult<()> {
        if self.host.trim().is_empty() {
            return Err(ServerError::config("host must not be empty"));
        }
        if self.max_frame_length == 0 {
            return Err(ServerError::config("max_frame_length must be positive"));
        }
        if self.thread_name.is_empty() {
            return Err(ServerError::config("thread_name must not be empty"));
        }
        Ok(())
    }

    /// Returns the listen host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the configured port.
    #[must_use]
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Returns the acceptor pool size.
    #[must_use]
    pub fn acceptor_threads(&self) -> usize {
        self.acceptor_threads
    }

    /// Returns the I/O pool size.
    #[must_use]
    pub fn io_threads(&self) -> usize {
        self.io_threads
    }

    /// Returns whether accepted sockets set `TCP_NODELAY`.
    #[must_use]
    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    /// Returns the maximum frame payload.
    #[must_use]
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Returns the pause after a failed `accept`.
    #[must_use]
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    /// Returns the worker thread name prefix.
    #[must_use]
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`EndpointConfig`].
#[derive(Debug, Clone)]
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    /// Creates a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EndpointConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                acceptor_threads: DEFAULT_ACCEPTOR_THREADS,
                io_threads: 0,
                tcp_nodelay: true,
                max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
                accept_backoff_ms: DEFAULT_ACCEPT_BACKOFF_MS,
                thread_name: DEFAULT_THREAD_NAME.to_string(),
            },
        }
    }

    /// Sets the listen host (e.g. "0.0.0.0", "127.0.0.1", "::1").
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the port used when binding from configuration.
    #[must_use]
    pub fn port(mut self, port: u32) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the acceptor pool size. `0` means one thread per core.
    #[must_use]
    pub fn acceptor_threads(mut self, threads: usize) -> Self {
        self.config.acceptor_threads = threads;
        self
    }

    /// Sets the I/O pool size. `0` means one thread per core.
    #[must_use]
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.io_threads = threads;
        self
    }

    /// Enables or disables `TCP_NODELAY` on accepted sockets.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    /// Sets the largest frame payload the default framing accepts.
    #[must_use]
    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.config.max_frame_length = max;
        self
    }

    /// Sets the pause after a failed `accept`.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: Duration) -> Self {
        self.config.accept_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Builds the [`EndpointConfig`].
    #[must_use]
    pub fn build(self) -> EndpointConfig {
        self.config
    }
}

impl Default for EndpointConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
