//! Worker pools.
//!
//! An endpoint drives two pools: the acceptor pool runs the accept loop and
//! the I/O pool runs every connection's handler chain. Each pool is a
//! multi-threaded Tokio runtime behind a cloneable handle, so a caller can
//! share one pool between several endpoints.
//!
//! # Example
//!
//! ```rust
//! use portico_server::WorkerPool;
//!
//! let pool = WorkerPool::new("io", 2).unwrap();
//! assert!(!pool.is_shutdown());
//!
//! assert!(pool.shutdown_gracefully());
//! assert!(!pool.shutdown_gracefully());
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{ServerError, ServerResult};

/// A named, shareable multi-threaded runtime.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl WorkerPool {
    /// Starts a pool with `threads` workers (`0` = one per core).
    pub fn new(name: impl Into<String>, threads: usize) -> ServerResult<Self> {
        let name = name.into();
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(name.clone());
        if threads > 0 {
            builder.worker_threads(threads);
        }

        let runtime = builder.build().map_err(|source| ServerError::Pool {
            name: name.clone(),
            source,
        })?;

        tracing::debug!(pool = %name, threads, "Worker pool started");

        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                handle: runtime.handle().clone(),
                runtime: Mutex::new(Some(runtime)),
            }),
        })
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a handle for spawning onto the pool.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Spawns a task onto the pool.
    ///
    /// After shutdown the task never runs.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Returns `true` once the pool has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.runtime.lock().is_none()
    }

    /// Stops the pool without waiting for its workers.
    ///
    /// New tasks are refused, running tasks are cancelled at their next
    /// yield point, and worker threads exit in the background. Safe to call
    /// from any thread, including one of the pool's own workers. Returns
    /// `true` for the call that performed the shutdown.
    pub fn shutdown_gracefully(&self) -> bool {
        let runtime = self.inner.runtime.lock().take();
        match runtime {
            Some(runtime) => {
                runtime.shutdown_background();
                tracing::debug!(pool = %self.inner.name, "Worker pool shut down");
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async contexts.
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}
