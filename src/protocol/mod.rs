//! Protocol module - wire format, framing and the message envelope.
//!
//! This module implements the data path below the RPC layer:
//! - fixed-width length header encoding/decoding
//! - arena-backed frame encoder
//! - frame buffer for reassembling partial reads
//! - the `{id, data, error}` envelope

mod encoder;
mod envelope;
mod frame;
mod frame_buffer;
mod wire_format;

pub use encoder::{default_arena_size, FrameEncoder};
pub use envelope::Envelope;
pub use frame::FrameCodec;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    effective_max_payload, validate_payload_len, HeaderFormat, ARENA_FRAMES,
    BINARY_HEADER_SIZE, DECIMAL_HEADER_SIZE, DECIMAL_MAX_PAYLOAD_SIZE, DEFAULT_MAX_PAYLOAD_SIZE,
    MAX_ARENA_SIZE,
};
