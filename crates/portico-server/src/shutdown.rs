//! Cancellation and connection accounting.
//!
//! [`ShutdownSignal`] is a cloneable one-shot flag with an awaitable
//! receiver. An endpoint uses one internally as its close-future, and
//! [`ServerEndpoint::bind_until`](crate::ServerEndpoint::bind_until) accepts
//! one from the caller as an explicit cancellation token.
//!
//! [`ConnectionTracker`] counts open connections through RAII tokens.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// A one-shot signal that any number of tasks can await.
///
/// # Example
///
/// ```rust
/// use portico_server::ShutdownSignal;
///
/// let signal = ShutdownSignal::new();
/// let observer = signal.clone();
///
/// signal.trigger();
/// assert!(observer.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
        }
    }

    /// Triggers the signal.
    ///
    /// Returns `true` for the call that flipped it; later calls return
    /// `false` and do nothing.
    pub fn trigger(&self) -> bool {
        let first = self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            self.token.cancel();
        }
        first
    }

    /// Returns `true` once the signal has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns a future that completes once the signal is triggered.
    ///
    /// Completes immediately if it already was.
    pub fn recv(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            wait: Box::pin(self.token.clone().cancelled_owned()),
        }
    }

    /// Creates a signal triggered by SIGINT or SIGTERM.
    ///
    /// The listener task is spawned on `handle`.
    #[must_use]
    pub fn with_os_signals(handle: &Handle) -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        handle.spawn(async move {
            match wait_for_os_signal().await {
                Ok(()) => {
                    trigger.trigger();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for shutdown signals");
                }
            }
        });

        signal
    }

    /// Returns a guard that triggers this signal when dropped.
    pub(crate) fn trigger_on_drop(&self) -> TriggerOnDrop {
        TriggerOnDrop(self.clone())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that completes when a [`ShutdownSignal`] is triggered.
///
/// Boxed internally, so it is `Unpin` and can be polled through `&mut`.
pub struct ShutdownReceiver {
    wait: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.wait.as_mut().poll(cx)
    }
}

/// Triggers its signal when dropped, however the owning task ends.
pub(crate) struct TriggerOnDrop(ShutdownSignal);

impl Drop for TriggerOnDrop {
    fn drop(&mut self) {
        self.0.trigger();
    }
}

/// Waits for SIGTERM or SIGINT (Ctrl+C only on non-Unix targets).
async fn wait_for_os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, closing endpoint");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, closing endpoint");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, closing endpoint");
        Ok(())
    }
}

/// Counts open connections.
///
/// # Example
///
/// ```rust
/// use portico_server::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    /// Creates a tracker with no open connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an open connection until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
        }
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Marks one open connection; dropping it closes the slot.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
