//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: need a full length header
//! - `WaitingForPayload`: length known, need that many payload bytes
//!
//! Chunks may be any size, including empty, a single byte, or several
//! frames at once. Payloads come out exactly once and in arrival order.
//!
//! # Example
//!
//! ```
//! use udsocket_rpc::protocol::{FrameBuffer, FrameEncoder};
//!
//! let mut encoder = FrameEncoder::new();
//! let frame = encoder.encode(b"hello").unwrap();
//!
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(&frame[..3]).unwrap().is_empty());
//! let payloads = buffer.push(&frame[3..]).unwrap();
//! assert_eq!(&payloads[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{effective_max_payload, HeaderFormat, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::error::{Result, RpcError};

/// Default initial capacity of the reassembly buffer.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length header.
    WaitingForHeader,
    /// Header parsed, waiting for `expected` payload bytes.
    WaitingForPayload { expected: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete payloads.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Header layout shared with the peer.
    format: HeaderFormat,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a frame buffer with the binary header and 1 MiB limit.
    pub fn new() -> Self {
        Self::with_format(HeaderFormat::Binary, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a frame buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self::with_format(HeaderFormat::Binary, max_payload_size)
    }

    /// Create a frame buffer for the given header layout and limit.
    pub fn with_format(format: HeaderFormat, max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForHeader,
            format,
            max_payload_size: effective_max_payload(format, max_payload_size),
        }
    }

    /// Feed a chunk and invoke `on_frame` once per complete payload.
    ///
    /// A trailing partial frame is kept for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] if a header declares more than the
    /// maximum payload size or is malformed. The offending header stays in
    /// the buffer, so repeated calls keep failing instead of resynchronizing
    /// on garbage.
    pub fn decode<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<()>
    where
        F: FnMut(Bytes),
    {
        self.buffer.extend_from_slice(chunk);

        while let Some(payload) = self.try_extract_one()? {
            on_frame(payload);
        }

        Ok(())
    }

    /// Push data into the buffer and collect all complete payloads.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        let mut payloads = Vec::new();
        self.decode(chunk, |payload| payloads.push(payload))?;
        Ok(payloads)
    }

    /// Try to extract a single payload from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(payload))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let width = self.format.width();
                    if self.buffer.len() < width {
                        return Ok(None);
                    }

                    // Peek first, consume only a valid header
                    let declared = self.format.decode(&self.buffer[..width])?;
                    if declared > self.max_payload_size {
                        return Err(RpcError::Protocol(format!(
                            "Payload size {} exceeds maximum {}",
                            declared, self.max_payload_size
                        )));
                    }

                    let _ = self.buffer.split_to(width);
                    self.state = State::WaitingForPayload {
                        expected: declared as usize,
                    };
                }

                State::WaitingForPayload { expected } => {
                    if self.buffer.len() < expected {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(expected).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Number of buffered, not yet emitted bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Payload length currently being waited for, if a header was consumed.
    pub fn expected_len(&self) -> Option<usize> {
        match self.state {
            State::WaitingForHeader => None,
            State::WaitingForPayload { expected } => Some(expected),
        }
    }

    /// Header layout in use.
    pub fn format(&self) -> HeaderFormat {
        self.format
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
