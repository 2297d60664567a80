//! The server endpoint.
//!
//! A [`ServerEndpoint`] owns a listening socket and two worker pools. The
//! acceptor pool runs the accept loop; every accepted socket moves to the I/O
//! pool, where a fresh [`HandlerChain`](portico_core::HandlerChain) is built
//! from a registry snapshot and installed before the first read.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use portico_core::{handler_fn, Flow};
//! use portico_server::{EndpointConfig, ServerEndpoint};
//!
//! let endpoint = Arc::new(
//!     ServerEndpoint::builder()
//!         .config(EndpointConfig::builder().host("127.0.0.1").build())
//!         .named_handler("echo", handler_fn(|ctx, frame| {
//!             ctx.write(frame);
//!             Ok(Flow::Consumed)
//!         }))
//!         .build()?,
//! );
//!
//! let closer = Arc::clone(&endpoint);
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     closer.close();
//! });
//!
//! // Blocks until `close` runs on the other thread.
//! endpoint.bind(9000)?;
//! # Ok::<(), portico_server::ServerError>(())
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portico_core::{
    length_field_framing, ChannelHandler, FramingFactory, HandlerChainBuilder, HandlerEntity,
    HandlerRegistry, SharedHandler,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::EndpointConfig;
use crate::connection;
use crate::error::{ServerError, ServerResult};
use crate::lifecycle::{EndpointLifecycle, EndpointState};
use crate::pool::WorkerPool;
use crate::port::ServerPort;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// A TCP server endpoint.
///
/// `bind` blocks its caller until the endpoint closes; `close` may be called
/// from any other thread at any time. Share the endpoint through an `Arc`.
pub struct ServerEndpoint {
    config: EndpointConfig,
    lifecycle: EndpointLifecycle,
    registry: Arc<HandlerRegistry>,
    chain_builder: HandlerChainBuilder,
    acceptor: WorkerPool,
    io: WorkerPool,
    closed: ShutdownSignal,
    tracker: ConnectionTracker,
    /// Also the close gate: every move to `Closed` happens under this lock.
    listener: Mutex<Option<ListenerResources>>,
}

struct ListenerResources {
    port: ServerPort,
    local_addr: SocketAddr,
    listening: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
}

/// How the blocking wait inside `bind` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Closed,
    Cancelled,
}

impl ServerEndpoint {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn builder() -> ServerEndpointBuilder {
        ServerEndpointBuilder::new()
    }

    /// Creates an endpoint with its own pools and no handlers.
    pub fn new(config: EndpointConfig) -> ServerResult<Self> {
        Self::builder().config(config).build()
    }

    /// Creates an endpoint whose handlers are appended in iteration order.
    pub fn with_handlers<I>(config: EndpointConfig, handlers: I) -> ServerResult<Self>
    where
        I: IntoIterator<Item = SharedHandler>,
    {
        Self::builder().config(config).handlers(handlers).build()
    }

    /// Binds `port` and serves until the endpoint is closed.
    ///
    /// Blocks the calling thread. Returns `Ok(())` once [`close`](Self::close)
    /// runs or the accept loop ends.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AsyncContext`] when called from inside a Tokio runtime
    /// - [`ServerError::InvalidState`] unless the endpoint is unbound
    /// - [`ServerError::InvalidPort`] outside 0–65535; no socket is opened
    ///   and the pools are left running
    /// - [`ServerError::Bind`] when the listener cannot be opened
    ///
    /// Every error except the first two leaves the endpoint closed.
    pub fn bind(&self, port: impl Into<i64>) -> ServerResult<()> {
        self.bind_until(port, ShutdownSignal::new())
    }

    /// Like [`bind`](Self::bind), but also returns when `cancel` fires.
    ///
    /// Cancellation closes the endpoint and fails with
    /// [`ServerError::BindInterrupted`]. `cancel` stays triggered.
    pub fn bind_until(&self, port: impl Into<i64>, cancel: ShutdownSignal) -> ServerResult<()> {
        if Handle::try_current().is_ok() {
            return Err(ServerError::AsyncContext);
        }

        let port = match ServerPort::new(port) {
            Ok(port) => port,
            Err(err) => return Err(self.reject_port(err)),
        };

        self.lifecycle
            .transition(EndpointState::Unbound, EndpointState::Binding)
            .map_err(|state| ServerError::InvalidState { state })?;

        let std_listener = self.closing_on_error(self.open_listener(port))?;
        if !self.closing_on_error(self.activate(port, std_listener))? {
            // Closed while the socket was being opened.
            return Ok(());
        }

        tracing::debug!(
            port = port.get(),
            "The server is started and can receive requests"
        );

        let closed = self.closed.recv();
        let cancelled = cancel.recv();
        let wake = self.acceptor.handle().block_on(async move {
            tokio::select! {
                biased;
                () = closed => Wake::Closed,
                () = cancelled => Wake::Cancelled,
            }
        });

        self.shutdown();

        match wake {
            Wake::Closed => Ok(()),
            Wake::Cancelled => Err(ServerError::BindInterrupted { port: port.get() }),
        }
    }

    /// Closes the endpoint.
    ///
    /// Idempotent and safe from any thread, including while another thread
    /// is blocked in `bind`. Does nothing on an unbound or closed endpoint.
    pub fn close(&self) {
        self.shutdown();
    }

    /// Returns `true` while the endpoint is active and its listener is live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
            && self
                .listener
                .lock()
                .as_ref()
                .is_some_and(|resources| resources.listening.load(Ordering::SeqCst))
    }

    /// Appends a handler after every registered one.
    pub fn add_last<H: ChannelHandler>(&self, handler: H) -> &Self {
        self.registry.add_last(handler);
        self
    }

    /// Appends a named handler after every registered one.
    pub fn add_last_named<H: ChannelHandler>(&self, name: impl Into<String>, handler: H) -> &Self {
        self.registry.add_last_named(name, handler);
        self
    }

    /// Places a handler before every registered one.
    pub fn add_first<H: ChannelHandler>(&self, handler: H) -> &Self {
        self.registry.add_first(handler);
        self
    }

    /// Places a named handler before every registered one.
    pub fn add_first_named<H: ChannelHandler>(&self, name: impl Into<String>, handler: H) -> &Self {
        self.registry.add_first_named(name, handler);
        self
    }

    /// Registers a handler with an explicit ordering key.
    pub fn add_handler(&self, entity: HandlerEntity) -> &Self {
        self.registry.register(entity);
        self
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        self.lifecycle.state()
    }

    /// Returns the address the listener is bound to while active.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(|r| r.local_addr)
    }

    /// Returns the port requested from `bind` while active.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.listener.lock().as_ref().map(|r| r.port.get())
    }

    /// Returns the handler registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Returns the pool running the accept loop.
    #[must_use]
    pub fn acceptor_pool(&self) -> &WorkerPool {
        &self.acceptor
    }

    /// Returns the pool running connections.
    #[must_use]
    pub fn io_pool(&self) -> &WorkerPool {
        &self.io
    }

    /// Returns the number of connections currently being served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.tracker.active_connections()
    }

    /// Closes an unbound endpoint after a bad port without touching the pools.
    ///
    /// An endpoint past `Unbound` reports its state instead.
    fn reject_port(&self, err: ServerError) -> ServerError {
        let _slot = self.listener.lock();
        match self
            .lifecycle
            .transition(EndpointState::Unbound, EndpointState::Closed)
        {
            Ok(()) => {
                self.closed.trigger();
                err
            }
            Err(state) => ServerError::InvalidState { state },
        }
    }

    /// Closes the endpoint if `result` failed.
    fn closing_on_error<T>(&self, result: ServerResult<T>) -> ServerResult<T> {
        if result.is_err() {
            self.shutdown();
        }
        result
    }

    fn open_listener(&self, port: ServerPort) -> ServerResult<std::net::TcpListener> {
        for pool in [&self.acceptor, &self.io] {
            if pool.is_shutdown() {
                return Err(ServerError::PoolShutdown {
                    name: pool.name().to_string(),
                });
            }
        }

        let bind_error = |source| ServerError::Bind {
            port: port.get(),
            source,
        };
        let listener =
            std::net::TcpListener::bind((self.config.host(), port.get())).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        Ok(listener)
    }

    /// Starts the accept loop and moves to `Active`.
    ///
    /// Returns `false` if the endpoint was closed in the meantime; the
    /// listener is dropped and nothing is spawned.
    fn activate(
        &self,
        port: ServerPort,
        std_listener: std::net::TcpListener,
    ) -> ServerResult<bool> {
        let bind_error = |source| ServerError::Bind {
            port: port.get(),
            source,
        };
        let local_addr = std_listener.local_addr().map_err(bind_error)?;

        let mut slot = self.listener.lock();
        if self.lifecycle.state() != EndpointState::Binding {
            return Ok(false);
        }

        let listener = {
            let _runtime = self.acceptor.handle().enter();
            TcpListener::from_std(std_listener).map_err(bind_error)?
        };

        let listening = Arc::new(AtomicBool::new(true));
        let accept_loop = AcceptLoop {
            listener,
            registry: Arc::clone(&self.registry),
            chain_builder: self.chain_builder.clone(),
            io: self.io.clone(),
            tracker: self.tracker.clone(),
            closed: self.closed.clone(),
            listening: Arc::clone(&listening),
            tcp_nodelay: self.config.tcp_nodelay(),
            backoff: self.config.accept_backoff(),
        };
        let accept_task = self.acceptor.spawn(accept_loop.run());

        *slot = Some(ListenerResources {
            port,
            local_addr,
            listening,
            accept_task,
        });

        self.lifecycle
            .transition(EndpointState::Binding, EndpointState::Active)
            .map_err(|state| ServerError::InvalidState { state })?;
        Ok(true)
    }

    /// Performs the close. Returns `true` for the call that did the work.
    fn shutdown(&self) -> bool {
        let mut slot = self.listener.lock();
        if matches!(
            self.lifecycle.state(),
            EndpointState::Unbound | EndpointState::Closed
        ) {
            return false;
        }

        let previous = self.lifecycle.close();
        self.closed.trigger();

        let released = slot.take().map(|resources| {
            resources.listening.store(false, Ordering::SeqCst);
            resources.accept_task.abort();
            resources.port
        });

        self.acceptor.shutdown_gracefully();
        self.io.shutdown_gracefully();

        if let Some(port) = released {
            tracing::debug!(
                port = port.get(),
                "The server is shut down and no more requests are received"
            );
        } else {
            tracing::debug!(from = ?previous, "Endpoint closed before it was listening");
        }
        true
    }
}

impl fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("handlers", &self.registry.len())
            .field("acceptor", &self.acceptor)
            .field("io", &self.io)
            .finish_non_exhaustive()
    }
}

/// Accepts connections and hands them to the I/O pool.
struct AcceptLoop {
    listener: TcpListener,
    registry: Arc<HandlerRegistry>,
    chain_builder: HandlerChainBuilder,
    io: WorkerPool,
    tracker: ConnectionTracker,
    closed: ShutdownSignal,
    listening: Arc<AtomicBool>,
    tcp_nodelay: bool,
    backoff: Duration,
}

/// Clears the live flag however the accept loop ends.
struct ListeningGuard(Arc<AtomicBool>);

impl Drop for ListeningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AcceptLoop {
    async fn run(self) {
        // A dead accept loop wakes the blocked `bind`.
        let _wake_bind = self.closed.trigger_on_drop();
        let _listening = ListeningGuard(Arc::clone(&self.listening));
        let mut closed = self.closed.recv();

        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(self.backoff).await;
                    }
                },
                () = &mut closed => break,
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(self.tcp_nodelay) {
            tracing::debug!(
                peer = %peer,
                error = %e,
                "Failed to set TCP_NODELAY"
            );
        }

        // Registrations made after this point only reach later connections.
        let snapshot = self.registry.snapshot();

        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    peer = %peer,
                    error = %e,
                    "Failed to hand off connection"
                );
                return;
            }
        };

        let chain_builder = self.chain_builder.clone();
        let token = self.tracker.acquire();
        self.io.spawn(async move {
            let _token = token;

            let chain = match chain_builder.build(&snapshot) {
                Ok(chain) => chain,
                Err(e) => {
                    tracing::warn!(
                        peer = %peer,
                        error = %e,
                        "Rejecting connection, its handler chain could not be built"
                    );
                    return;
                }
            };

            match TcpStream::from_std(stream) {
                Ok(stream) => connection::drive(stream, peer, chain).await,
                Err(e) => {
                    tracing::error!(
                        peer = %peer,
                        error = %e,
                        "Failed to register connection"
                    );
                }
            }
        });
    }
}

/// Builder for [`ServerEndpoint`].
///
/// # Example
///
/// ```rust
/// use portico_core::{handler_fn, Flow};
/// use portico_server::{EndpointState, ServerEndpoint};
///
/// let endpoint = ServerEndpoint::builder()
///     .named_handler("drop", handler_fn(|_ctx, _frame| Ok(Flow::Consumed)))
///     .build()
///     .unwrap();
///
/// assert_eq!(endpoint.state(), EndpointState::Unbound);
/// assert_eq!(endpoint.registry().len(), 1);
/// ```
pub struct ServerEndpointBuilder {
    config: EndpointConfig,
    registry: HandlerRegistry,
    framing: Option<FramingFactory>,
    pools: Option<(WorkerPool, WorkerPool)>,
}

impl ServerEndpointBuilder {
    /// Creates a builder with default configuration and no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EndpointConfig::default(),
            registry: HandlerRegistry::new(),
            framing: None,
            pools: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends an anonymous handler.
    #[must_use]
    pub fn handler<H: ChannelHandler>(self, handler: H) -> Self {
        self.registry.add_last(handler);
        self
    }

    /// Appends a named handler.
    #[must_use]
    pub fn named_handler<H: ChannelHandler>(self, name: impl Into<String>, handler: H) -> Self {
        self.registry.add_last_named(name, handler);
        self
    }

    /// Appends shared handlers in iteration order.
    #[must_use]
    pub fn handlers<I>(self, handlers: I) -> Self
    where
        I: IntoIterator<Item = SharedHandler>,
    {
        for handler in handlers {
            self.registry.add_last_shared(None, handler);
        }
        self
    }

    /// Replaces the default length-prefixed framing.
    #[must_use]
    pub fn framing(mut self, framing: FramingFactory) -> Self {
        self.framing = Some(framing);
        self
    }

    /// Uses existing pools instead of creating them.
    ///
    /// Closing the endpoint shuts both pools down.
    #[must_use]
    pub fn pools(mut self, acceptor: WorkerPool, io: WorkerPool) -> Self {
        self.pools = Some((acceptor, io));
        self
    }

    /// Builds the endpoint, starting its pools unless supplied.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] for an invalid configuration and
    /// [`ServerError::Pool`] when a pool cannot start.
    pub fn build(self) -> ServerResult<ServerEndpoint> {
        self.config.validate()?;

        let (acceptor, io) = match self.pools {
            Some(pools) => pools,
            None => {
                let prefix = self.config.thread_name();
                (
                    WorkerPool::new(
                        format!("{prefix}-acceptor"),
                        self.config.acceptor_threads(),
                    )?,
                    WorkerPool::new(format!("{prefix}-io"), self.config.io_threads())?,
                )
            }
        };

        let framing = self
            .framing
            .unwrap_or_else(|| length_field_framing(self.config.max_frame_length()));

        Ok(ServerEndpoint {
            config: self.config,
            lifecycle: EndpointLifecycle::new(),
            registry: Arc::new(self.registry),
            chain_builder: HandlerChainBuilder::new(framing),
            acceptor,
            io,
            closed: ShutdownSignal::new(),
            tracker: ConnectionTracker::new(),
            listener: Mutex::new(None),
        })
    }
}

impl Default for ServerEndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerEndpointBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEndpointBuilder")
            .field("config", &self.config)
            .field("handlers", &self.registry.len())
            .field("custom_framing", &self.framing.is_some())
            .finish_non_exhaustive()
    }
}
