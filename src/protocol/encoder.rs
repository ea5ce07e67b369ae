//! Arena-backed frame encoder.
//!
//! Frames are written into one preallocated arena and handed out as frozen
//! `Bytes` views, so sending a message costs no allocation until the arena
//! is exhausted. A fresh arena is started once the current one cannot hold
//! the next frame.
//!
//! Views are reference counted: an old arena stays alive until the last
//! view into it is dropped, so a frame still queued for the writer can
//! never be overwritten by a later `encode`.
//!
//! # Example
//!
//! ```
//! use udsocket_rpc::protocol::FrameEncoder;
//!
//! let mut encoder = FrameEncoder::new();
//! let frame = encoder.encode(b"hi").unwrap();
//! assert_eq!(&frame[..], &[0, 0, 0, 2, b'h', b'i']);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    effective_max_payload, validate_payload_len, HeaderFormat, ARENA_FRAMES,
    DEFAULT_MAX_PAYLOAD_SIZE, MAX_ARENA_SIZE,
};
use crate::error::Result;

/// Length-prefix encoder writing into a recycled arena.
pub struct FrameEncoder {
    /// Unused tail of the current arena.
    arena: BytesMut,
    /// Capacity of each new arena.
    arena_size: usize,
    /// Header layout shared with the peer.
    format: HeaderFormat,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameEncoder {
    /// Create an encoder with the binary header and 1 MiB limit.
    pub fn new() -> Self {
        Self::with_format(HeaderFormat::Binary, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create an encoder for the given header layout and limit.
    ///
    /// The arena holds four maximum-size frames, capped at 16 MiB.
    pub fn with_format(format: HeaderFormat, max_payload_size: u32) -> Self {
        let arena_size = default_arena_size(format, max_payload_size);
        Self::with_arena(format, max_payload_size, arena_size)
    }

    /// Create an encoder with an explicit arena size.
    ///
    /// A frame larger than the arena gets a dedicated allocation.
    pub fn with_arena(format: HeaderFormat, max_payload_size: u32, arena_size: usize) -> Self {
        let max_payload_size = effective_max_payload(format, max_payload_size);
        Self {
            arena: BytesMut::new(),
            arena_size,
            format,
            max_payload_size,
        }
    }

    /// Encode a payload into `[header][payload]`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::PayloadTooLarge`](crate::RpcError::PayloadTooLarge)
    /// without touching the arena if the payload exceeds the limit.
    pub fn encode(&mut self, payload: &[u8]) -> Result<Bytes> {
        let len = validate_payload_len(payload.len(), self.max_payload_size)?;
        let needed = self.format.width() + payload.len();

        if self.arena.capacity() < needed {
            self.arena = BytesMut::with_capacity(self.arena_size.max(needed));
        }

        self.format.encode_into(len, &mut self.arena);
        self.arena.put_slice(payload);
        Ok(self.arena.split().freeze())
    }

    /// Encode a UTF-8 string payload.
    #[inline]
    pub fn encode_str(&mut self, payload: &str) -> Result<Bytes> {
        self.encode(payload.as_bytes())
    }

    /// Bytes left in the current arena.
    #[inline]
    pub fn arena_remaining(&self) -> usize {
        self.arena.capacity()
    }

    /// Capacity given to each new arena.
    #[inline]
    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    /// Maximum payload size accepted by `encode`.
    #[inline]
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    /// Header layout in use.
    #[inline]
    pub fn format(&self) -> HeaderFormat {
        self.format
    }
}

/// Arena size used when none is configured.
pub fn default_arena_size(format: HeaderFormat, max_payload_size: u32) -> usize {
    let frame = effective_max_payload(format, max_payload_size) as usize + format.width();
    frame.saturating_mul(ARENA_FRAMES).min(MAX_ARENA_SIZE)
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}
