//! # Portico Server
//!
//! A TCP server endpoint that installs an ordered handler chain on every
//! accepted connection.
//!
//! This crate provides:
//!
//! - [`ServerEndpoint`] - blocking `bind`, thread-safe idempotent `close`
//! - [`EndpointConfig`] - builder, file and environment configuration
//! - [`WorkerPool`] - the acceptor and I/O runtimes an endpoint drives
//! - [`ShutdownSignal`] - cancellation for [`ServerEndpoint::bind_until`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use portico_core::{handler_fn, Flow};
//! use portico_server::{ServerEndpoint, ShutdownSignal};
//!
//! let endpoint = ServerEndpoint::builder()
//!     .named_handler("echo", handler_fn(|ctx, frame| {
//!         ctx.write(frame);
//!         Ok(Flow::Consumed)
//!     }))
//!     .build()?;
//!
//! let stop = ShutdownSignal::with_os_signals(endpoint.acceptor_pool().handle());
//! match endpoint.bind_until(8080, stop) {
//!     Ok(()) | Err(portico_server::ServerError::BindInterrupted { .. }) => {}
//!     Err(e) => return Err(e),
//! }
//! # Ok::<(), portico_server::ServerError>(())
//! ```

#![doc(html_root_url = "https://docs.rs/portico-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
mod connection;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod port;
pub mod shutdown;

pub use config::{EndpointConfig, EndpointConfigBuilder};
pub use endpoint::{ServerEndpoint, ServerEndpointBuilder};
pub use error::{ServerError, ServerResult};
pub use lifecycle::{EndpointLifecycle, EndpointState};
pub use pool::WorkerPool;
pub use port::ServerPort;
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownReceiver, ShutdownSignal};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
