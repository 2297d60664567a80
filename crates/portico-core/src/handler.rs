//! The processing-stage trait and its per-connection context.
//!
//! Every application stage implements [`ChannelHandler`]. Stages receive
//! decoded inbound frames in chain order and decide whether to forward a
//! (possibly transformed) frame to the next stage or consume it. Outbound
//! frames are queued on the [`HandlerContext`] and run through the chain's
//! encoder once the current dispatch finishes.
//!
//! # Example
//!
//! ```
//! use portico_core::{handler_fn, Flow};
//!
//! let echo = handler_fn(|ctx, frame| {
//!     ctx.write(frame);
//!     Ok(Flow::Consumed)
//! });
//! # let _ = echo;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::CoreError;

/// A boxed future used by handler callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a stage did with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Pass this frame on to the next stage.
    Continue(Bytes),
    /// Stop dispatching; later stages do not see the frame.
    Consumed,
}

/// A unit of per-connection processing installed into a handler chain.
///
/// Implementations are shared between every connection that installs them,
/// so any per-connection state has to live outside `&self` (for example in a
/// map keyed by [`HandlerContext::peer_addr`]).
pub trait ChannelHandler: Send + Sync + 'static {
    /// Called once after the chain is installed, before the first read.
    fn channel_active(&self, _ctx: &mut HandlerContext) -> Result<(), CoreError> {
        Ok(())
    }

    /// Processes one decoded inbound frame.
    fn channel_read<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        frame: Bytes,
    ) -> BoxFuture<'a, Result<Flow, CoreError>>;

    /// Called once after the connection has ended.
    fn channel_inactive(&self, _ctx: &mut HandlerContext) {}

    /// Called when the connection fails with `error`.
    fn exception_caught(&self, _ctx: &mut HandlerContext, _error: &CoreError) {}
}

impl<T: ChannelHandler + ?Sized> ChannelHandler for Arc<T> {
    fn channel_active(&self, ctx: &mut HandlerContext) -> Result<(), CoreError> {
        (**self).channel_active(ctx)
    }

    fn channel_read<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        frame: Bytes,
    ) -> BoxFuture<'a, Result<Flow, CoreError>> {
        (**self).channel_read(ctx, frame)
    }

    fn channel_inactive(&self, ctx: &mut HandlerContext) {
        (**self).channel_inactive(ctx);
    }

    fn exception_caught(&self, ctx: &mut HandlerContext, error: &CoreError) {
        (**self).exception_caught(ctx, error);
    }
}

/// Mutable state handed to each stage while it runs.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    peer_addr: Option<SocketAddr>,
    stage_index: usize,
    stage_name: Option<String>,
    outbound: Vec<Bytes>,
    close_requested: bool,
}

impl HandlerContext {
    /// Creates a context for a connection from `peer_addr`.
    #[must_use]
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            peer_addr,
            stage_index: 0,
            stage_name: None,
            outbound: Vec::new(),
            close_requested: false,
        }
    }

    /// Returns the remote address, if known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the chain position of the stage currently running.
    #[must_use]
    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    /// Returns the name of the stage currently running, if it has one.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        self.stage_name.as_deref()
    }

    /// Queues a frame for the outbound encoder.
    pub fn write(&mut self, frame: impl Into<Bytes>) {
        self.outbound.push(frame.into());
    }

    /// Asks the connection to close after the current dispatch.
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    /// Returns `true` if a stage asked for the connection to close.
    #[must_use]
    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    /// Returns the number of queued outbound frames.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.outbound.len()
    }

    /// Drains the queued outbound frames in write order.
    pub fn take_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbound)
    }

    pub(crate) fn enter(&mut self, index: usize, name: Option<&str>) {
        self.stage_index = index;
        self.stage_name = name.map(ToString::to_string);
    }
}

/// A handler built from a synchronous closure.
///
/// Created by [`handler_fn`].
pub struct FnHandler<F> {
    func: F,
}

/// Creates a [`ChannelHandler`] from a closure run on every inbound frame.
pub fn handler_fn<F>(func: F) -> FnHandler<F>
where
    F: Fn(&mut HandlerContext, Bytes) -> Result<Flow, CoreError> + Send + Sync + 'static,
{
    FnHandler { func }
}

impl<F> ChannelHandler for FnHandler<F>
where
    F: Fn(&mut HandlerContext, Bytes) -> Result<Flow, CoreError> + Send + Sync + 'static,
{
    fn channel_read<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        frame: Bytes,
    ) -> BoxFuture<'a, Result<Flow, CoreError>> {
        let result = (self.func)(ctx, frame);
        Box::pin(std::future::ready(result))
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_write_and_drain() {
        let mut ctx = HandlerContext::new(None);
        ctx.write(Bytes::from_static(b"a"));
        ctx.write(b"b".to_vec());

        assert_eq!(ctx.pending_writes(), 2);
        let frames = ctx.take_outbound();
        assert_eq!(frames, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(ctx.pending_writes(), 0);
    }

    #[test]
    fn test_context_close_flag() {
        let mut ctx = HandlerContext::new(None);
        assert!(!ctx.is_close_requested());
        ctx.close();
        assert!(ctx.is_close_requested());
    }

    #[test]
    fn test_context_enter_tracks_stage() {
        let mut ctx = HandlerContext::new(Some("127.0.0.1:9000".parse().unwrap()));
        ctx.enter(3, Some("auth"));
        assert_eq!(ctx.stage_index(), 3);
        assert_eq!(ctx.stage_name(), Some("auth"));

        ctx.enter(4, None);
        assert_eq!(ctx.stage_name(), None);
        assert_eq!(ctx.peer_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_handler_fn_runs_closure() {
        let upper = handler_fn(|_ctx, frame| Ok(Flow::Continue(frame.to_ascii_uppercase().into())));
        let mut ctx = HandlerContext::new(None);

        let flow = tokio_test::block_on(upper.channel_read(&mut ctx, Bytes::from_static(b"ping")));
        assert_eq!(flow.unwrap(), Flow::Continue(Bytes::from_static(b"PING")));
    }

    #[test]
    fn test_arc_handler_delegates() {
        let shared = Arc::new(handler_fn(|ctx, frame| {
            ctx.write(frame);
            Ok(Flow::Consumed)
        }));
        let mut ctx = HandlerContext::new(None);

        let flow = tokio_test::block_on(shared.channel_read(&mut ctx, Bytes::from_static(b"x")));
        assert_eq!(flow.unwrap(), Flow::Consumed);
        assert_eq!(ctx.pending_writes(), 1);
    }
}
