//! Frame codec pairing the encoder and the reassembly buffer.
//!
//! A channel splits the codec so the write path owns the encoder and the
//! read loop owns the buffer.
//!
//! # Example
//!
//! ```
//! use udsocket_rpc::protocol::FrameCodec;
//!
//! let mut codec = FrameCodec::new();
//! let frame = codec.encode(b"ping").unwrap();
//!
//! let mut seen = Vec::new();
//! for byte in frame.iter() {
//!     codec.decode(&[*byte], |payload| seen.push(payload)).unwrap();
//! }
//! assert_eq!(&seen[0][..], b"ping");
//! ```

use bytes::Bytes;

use super::encoder::FrameEncoder;
use super::frame_buffer::FrameBuffer;
use super::wire_format::{HeaderFormat, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::error::Result;

/// Length-prefixed frame codec.
pub struct FrameCodec {
    encoder: FrameEncoder,
    decoder: FrameBuffer,
}

impl FrameCodec {
    /// Binary 4-byte header, 1 MiB payload limit.
    pub fn new() -> Self {
        Self::with_format(HeaderFormat::Binary, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Codec for the given header layout and limit.
    pub fn with_format(format: HeaderFormat, max_payload_size: u32) -> Self {
        Self::from_parts(
            FrameEncoder::with_format(format, max_payload_size),
            FrameBuffer::with_format(format, max_payload_size),
        )
    }

    /// Assemble from separately configured halves.
    pub fn from_parts(encoder: FrameEncoder, decoder: FrameBuffer) -> Self {
        Self { encoder, decoder }
    }

    /// Encode one payload into a complete frame.
    #[inline]
    pub fn encode(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.encoder.encode(payload)
    }

    /// Feed a chunk of the inbound stream, emitting every completed payload.
    #[inline]
    pub fn decode<F>(&mut self, chunk: &[u8], on_frame: F) -> Result<()>
    where
        F: FnMut(Bytes),
    {
        self.decoder.decode(chunk, on_frame)
    }

    /// Bytes of a partial frame waiting for more input.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.decoder.len()
    }

    /// Split into the write half and the read half.
    pub fn split(self) -> (FrameEncoder, FrameBuffer) {
        (self.encoder, self.decoder)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
