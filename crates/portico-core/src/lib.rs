//! # Portico Core
//!
//! Building blocks shared by every Portico endpoint:
//!
//! - [`ChannelHandler`] - a unit of per-connection processing
//! - [`HandlerEntity`] - a stage plus the key that orders it
//! - [`HandlerRegistry`] - concurrent registration with front/back placement
//! - [`HandlerChainBuilder`] - turns a registry snapshot into the ordered
//!   chain installed on a connection
//! - [`FrameEncoder`] / [`FrameDecoder`] - the fixed framing stages
//!
//! ## Example
//!
//! ```
//! use portico_core::{
//!     handler_fn, length_field_framing, Flow, HandlerChainBuilder, HandlerRegistry, StageKind,
//! };
//!
//! let registry = HandlerRegistry::new();
//! registry.add_last_named("echo", handler_fn(|ctx, frame| {
//!     ctx.write(frame);
//!     Ok(Flow::Consumed)
//! }));
//! registry.add_first_named("trim", handler_fn(|_ctx, frame| Ok(Flow::Continue(frame))));
//!
//! let chain = HandlerChainBuilder::new(length_field_framing(1024))
//!     .build(&registry.snapshot())
//!     .unwrap();
//!
//! assert_eq!(chain.kinds()[..2], [StageKind::Encoder, StageKind::Decoder]);
//! assert_eq!(chain.names(), vec![Some("trim"), Some("echo")]);
//! ```

#![doc(html_root_url = "https://docs.rs/portico-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod codec;
pub mod entity;
pub mod error;
pub mod handler;
pub mod registry;

pub use chain::{HandlerChain, HandlerChainBuilder, InstalledHandler, StageKind, FRAMING_STAGES};
pub use codec::{
    length_field_framing, FrameDecoder, FrameEncoder, Framing, FramingFactory,
    LengthFieldDecoder, LengthFieldEncoder, DEFAULT_MAX_FRAME_LENGTH,
};
pub use entity::{HandlerEntity, SharedHandler};
pub use error::{CoreError, CoreResult};
pub use handler::{handler_fn, BoxFuture, ChannelHandler, Flow, FnHandler, HandlerContext};
pub use registry::HandlerRegistry;
