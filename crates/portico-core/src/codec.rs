//! Framing stages.
//!
//! The encoder and decoder are the two fixed stages at the head of every
//! chain. They own byte-level message boundaries; application stages only
//! ever see whole frames.
//!
//! The default framing is a 4-byte big-endian length prefix followed by the
//! payload.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CoreError;

/// Size of the length prefix written by [`LengthFieldEncoder`].
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Default maximum frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Outbound framing stage: turns a frame into wire bytes.
pub trait FrameEncoder: Send + Sync + 'static {
    /// Appends the encoded form of `frame` to `dst`.
    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), CoreError>;
}

/// Inbound framing stage: carves whole frames out of a read buffer.
pub trait FrameDecoder: Send + Sync + 'static {
    /// Removes and returns the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a full frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CoreError>;
}

/// A fresh encoder/decoder pair for one connection.
pub struct Framing {
    /// Outbound stage.
    pub encoder: Box<dyn FrameEncoder>,
    /// Inbound stage.
    pub decoder: Box<dyn FrameDecoder>,
}

impl Framing {
    /// Creates a framing pair from explicit stages.
    pub fn new(encoder: impl FrameEncoder, decoder: impl FrameDecoder) -> Self {
        Self {
            encoder: Box::new(encoder),
            decoder: Box::new(decoder),
        }
    }

    /// Length-prefixed framing with the given payload limit.
    #[must_use]
    pub fn length_field(max_frame_length: usize) -> Self {
        Self::new(
            LengthFieldEncoder::new(max_frame_length),
            LengthFieldDecoder::new(max_frame_length),
        )
    }
}

impl fmt::Debug for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framing").finish_non_exhaustive()
    }
}

/// Produces a new [`Framing`] for every accepted connection.
///
/// Decoders carry partial-frame state, so they are never shared.
pub type FramingFactory = Arc<dyn Fn() -> Framing + Send + Sync>;

/// Returns a factory for length-prefixed framing.
pub fn length_field_framing(max_frame_length: usize) -> FramingFactory {
    Arc::new(move || Framing::length_field(max_frame_length))
}

/// Writes a 4-byte big-endian length prefix before each frame.
#[derive(Debug, Clone)]
pub struct LengthFieldEncoder {
    max_frame_length: usize,
}

impl LengthFieldEncoder {
    /// Creates an encoder rejecting frames above `max_frame_length`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for LengthFieldEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl FrameEncoder for LengthFieldEncoder {
    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), CoreError> {
        let length = frame.len();
        let max = self.max_frame_length;
        let prefix = match u32::try_from(length) {
            Ok(prefix) if length <= max => prefix,
            _ => return Err(CoreError::FrameTooLong { length, max }),
        };
        dst.reserve(LENGTH_FIELD_SIZE + length);
        dst.put_u32(prefix);
        dst.put_slice(&frame);
        Ok(())
    }
}

/// Reads a 4-byte big-endian length prefix and the payload that follows.
#[derive(Debug, Clone)]
pub struct LengthFieldDecoder {
    max_frame_length: usize,
}

impl LengthFieldDecoder {
    /// Creates a decoder rejecting frames above `max_frame_length`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for LengthFieldDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl FrameDecoder for LengthFieldDecoder {
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CoreError> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_FIELD_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_FIELD_SIZE]);
        let length = u32::from_be_bytes(prefix) as usize;

        if length > self.max_frame_length {
            return Err(CoreError::FrameTooLong {
                length,
                max: self.max_frame_length,
            });
        }

        if src.len() < LENGTH_FIELD_SIZE + length {
            src.reserve(LENGTH_FIELD_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        Ok(Some(src.split_to(length).freeze()))
    }
}
