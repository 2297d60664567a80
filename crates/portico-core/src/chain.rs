//! Per-connection handler chains.
//!
//! A chain is an immutable framing prefix followed by the registered stages
//! sorted by their ordering key:
//!
//! ```text
//! [0] encoder   (outbound)
//! [1] decoder   (inbound)
//! [2..] registered stages, ascending (order, sequence, name)
//! ```
//!
//! [`HandlerChainBuilder`] produces one chain per accepted connection from a
//! registry snapshot, so registrations made later never reach a chain that
//! already exists.

use std::collections::HashSet;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::codec::{FrameDecoder, FrameEncoder, Framing, FramingFactory};
use crate::entity::{HandlerEntity, SharedHandler};
use crate::error::CoreError;
use crate::handler::{Flow, HandlerContext};

/// Number of fixed framing stages at the head of every chain.
pub const FRAMING_STAGES: usize = 2;

/// The role of a stage within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// The outbound framing stage.
    Encoder,
    /// The inbound framing stage.
    Decoder,
    /// A registered application stage.
    Handler,
}

/// A registered stage as installed in a chain.
#[derive(Clone)]
pub struct InstalledHandler {
    name: Option<String>,
    handler: SharedHandler,
}

impl InstalledHandler {
    /// Returns the name the stage was installed under.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the stage itself.
    #[must_use]
    pub fn handler(&self) -> &SharedHandler {
        &self.handler
    }
}

impl fmt::Debug for InstalledHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The ordered stages applied to one connection.
pub struct HandlerChain {
    encoder: Box<dyn FrameEncoder>,
    decoder: Box<dyn FrameDecoder>,
    handlers: Vec<InstalledHandler>,
}

impl HandlerChain {
    /// Returns the total number of stages, framing included.
    #[must_use]
    pub fn len(&self) -> usize {
        FRAMING_STAGES + self.handlers.len()
    }

    /// Always `false`: the framing stages are always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the role of every stage in chain order.
    #[must_use]
    pub fn kinds(&self) -> Vec<StageKind> {
        let mut kinds = vec![StageKind::Encoder, StageKind::Decoder];
        kinds.extend(self.handlers.iter().map(|_| StageKind::Handler));
        kinds
    }

    /// Returns the role of the stage at `index`.
    #[must_use]
    pub fn kind_at(&self, index: usize) -> Option<StageKind> {
        match index {
            0 => Some(StageKind::Encoder),
            1 => Some(StageKind::Decoder),
            i if i < self.len() => Some(StageKind::Handler),
            _ => None,
        }
    }

    /// Returns the installed names of the application stages, in order.
    #[must_use]
    pub fn names(&self) -> Vec<Option<&str>> {
        self.handlers.iter().map(InstalledHandler::name).collect()
    }

    /// Returns the application stages in order.
    #[must_use]
    pub fn handlers(&self) -> &[InstalledHandler] {
        &self.handlers
    }

    /// Returns the application stage at chain position `index`.
    #[must_use]
    pub fn handler_at(&self, index: usize) -> Option<&SharedHandler> {
        index
            .checked_sub(FRAMING_STAGES)
            .and_then(|i| self.handlers.get(i))
            .map(InstalledHandler::handler)
    }

    /// Returns the stage installed under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedHandler> {
        self.position(name).and_then(|i| self.handler_at(i))
    }

    /// Returns the chain position of the stage installed under `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.handlers
            .iter()
            .position(|h| h.name() == Some(name))
            .map(|i| i + FRAMING_STAGES)
    }

    /// Runs `frame` through the outbound encoder.
    pub fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), CoreError> {
        self.encoder.encode(frame, dst)
    }

    /// Pulls the next whole frame out of `src` with the inbound decoder.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CoreError> {
        self.decoder.decode(src)
    }

    /// Notifies every stage, in order, that the connection is live.
    ///
    /// Stops at the first stage that fails.
    pub fn fire_channel_active(&self, ctx: &mut HandlerContext) -> Result<(), CoreError> {
        for (offset, installed) in self.handlers.iter().enumerate() {
            ctx.enter(offset + FRAMING_STAGES, installed.name());
            installed.handler.channel_active(ctx)?;
        }
        Ok(())
    }

    /// Dispatches one decoded frame through the application stages.
    ///
    /// Each stage either forwards a frame to the next one or consumes it. A
    /// frame forwarded past the last stage is dropped.
    pub async fn fire_channel_read(
        &self,
        ctx: &mut HandlerContext,
        frame: Bytes,
    ) -> Result<(), CoreError> {
        let mut frame = frame;
        for (offset, installed) in self.handlers.iter().enumerate() {
            ctx.enter(offset + FRAMING_STAGES, installed.name());
            match installed.handler.channel_read(ctx, frame).await? {
                Flow::Continue(next) => frame = next,
                Flow::Consumed => return Ok(()),
            }
        }
        tracing::trace!(
            bytes = frame.len(),
            "Discarded inbound frame that reached the end of the chain"
        );
        Ok(())
    }

    /// Notifies every stage, in order, that the connection has ended.
    pub fn fire_channel_inactive(&self, ctx: &mut HandlerContext) {
        for (offset, installed) in self.handlers.iter().enumerate() {
            ctx.enter(offset + FRAMING_STAGES, installed.name());
            installed.handler.channel_inactive(ctx);
        }
    }

    /// Reports `error` to the stage at chain position `origin` and every
    /// stage after it.
    ///
    /// Errors raised by the framing stages reach every application stage.
    pub fn fire_exception_caught(
        &self,
        ctx: &mut HandlerContext,
        origin: usize,
        error: &CoreError,
    ) {
        let skip = origin.saturating_sub(FRAMING_STAGES);
        for (offset, installed) in self.handlers.iter().enumerate().skip(skip) {
            ctx.enter(offset + FRAMING_STAGES, installed.name());
            installed.handler.exception_caught(ctx, error);
        }
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("kinds", &self.kinds())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

/// Builds the ordered chain installed on each new connection.
#[derive(Clone)]
pub struct HandlerChainBuilder {
    framing: FramingFactory,
}

impl HandlerChainBuilder {
    /// Creates a builder drawing a fresh framing pair from `framing`.
    #[must_use]
    pub fn new(framing: FramingFactory) -> Self {
        Self { framing }
    }

    /// Builds a chain from a registry snapshot.
    ///
    /// Fails with [`CoreError::DuplicateHandlerName`] if two entities share a
    /// name; no partial chain is returned.
    pub fn build(&self, snapshot: &[HandlerEntity]) -> Result<HandlerChain, CoreError> {
        let Framing { encoder, decoder } = (self.framing)();
        Self::assemble(encoder, decoder, snapshot)
    }

    fn assemble(
        encoder: Box<dyn FrameEncoder>,
        decoder: Box<dyn FrameDecoder>,
        snapshot: &[HandlerEntity],
    ) -> Result<HandlerChain, CoreError> {
        let mut sorted = snapshot.to_vec();
        sorted.sort();

        let mut seen = HashSet::with_capacity(sorted.len());
        let mut handlers = Vec::with_capacity(sorted.len());
        for entity in sorted {
            if let Some(name) = entity.name() {
                if !seen.insert(name.to_string()) {
                    return Err(CoreError::DuplicateHandlerName {
                        name: name.to_string(),
                    });
                }
            }
            handlers.push(InstalledHandler {
                name: entity.name().map(ToString::to_string),
                handler: entity.handler().clone(),
            });
        }

        Ok(HandlerChain {
            encoder,
            decoder,
            handlers,
        })
    }
}

impl fmt::Debug for HandlerChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChainBuilder").finish_non_exhaustive()
    }
}
