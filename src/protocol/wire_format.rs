//! Frame header encoding and decoding.
//!
//! Every frame is `[length header][payload]`. Two header layouts exist and
//! both peers must agree on one:
//!
//! ```text
//! Binary:   ┌──────────────────┐
//!           │ payload length   │  4 bytes, uint32 BE
//!           └──────────────────┘
//! Decimal:  ┌──────────────────┐
//!           │ "0000042"        │  7 ASCII digits, zero padded
//!           └──────────────────┘
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RpcError};

/// Width of the binary header in bytes.
pub const BINARY_HEADER_SIZE: usize = 4;

/// Width of the decimal header in ASCII digits.
pub const DECIMAL_HEADER_SIZE: usize = 7;

/// Largest length a decimal header can express.
pub const DECIMAL_MAX_PAYLOAD_SIZE: u32 = 9_999_999;

/// Default maximum payload size (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

/// Arena size multiplier: an arena holds this many max-size frames.
pub const ARENA_FRAMES: usize = 4;

/// Upper bound for a default-sized encoder arena (16 MiB).
pub const MAX_ARENA_SIZE: usize = 16 * 1024 * 1024;

/// Layout of the fixed-width length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderFormat {
    /// 4-byte big-endian unsigned length.
    #[default]
    Binary,
    /// 7 zero-padded ASCII decimal digits.
    Decimal,
}

impl HeaderFormat {
    /// Header width in bytes.
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            HeaderFormat::Binary => BINARY_HEADER_SIZE,
            HeaderFormat::Decimal => DECIMAL_HEADER_SIZE,
        }
    }

    /// Largest payload length this header can carry.
    #[inline]
    pub const fn max_encodable(self) -> u32 {
        match self {
            HeaderFormat::Binary => u32::MAX,
            HeaderFormat::Decimal => DECIMAL_MAX_PAYLOAD_SIZE,
        }
    }

    /// Select a format by header width (4 or 7).
    pub fn from_width(width: usize) -> Result<Self> {
        match width {
            BINARY_HEADER_SIZE => Ok(HeaderFormat::Binary),
            DECIMAL_HEADER_SIZE => Ok(HeaderFormat::Decimal),
            other => Err(RpcError::Config(format!(
                "unsupported header size {} (expected {} or {})",
                other, BINARY_HEADER_SIZE, DECIMAL_HEADER_SIZE
            ))),
        }
    }

    /// Append the header for a payload of `len` bytes.
    ///
    /// The caller has already checked `len` against the payload limit,
    /// which never exceeds [`max_encodable`](Self::max_encodable).
    pub fn encode_into(self, len: u32, buf: &mut BytesMut) {
        debug_assert!(len <= self.max_encodable());
        match self {
            HeaderFormat::Binary => buf.put_u32(len),
            HeaderFormat::Decimal => {
                let mut digits = [b'0'; DECIMAL_HEADER_SIZE];
                let mut rest = len;
                for slot in digits.iter_mut().rev() {
                    *slot = b'0' + (rest % 10) as u8;
                    rest /= 10;
                }
                buf.put_slice(&digits);
            }
        }
    }

    /// Decode a payload length from exactly [`width`](Self::width) bytes.
    pub fn decode(self, header: &[u8]) -> Result<u32> {
        if header.len() != self.width() {
            return Err(RpcError::Protocol(format!(
                "header must be {} bytes, got {}",
                self.width(),
                header.len()
            )));
        }

        match self {
            HeaderFormat::Binary => Ok(u32::from_be_bytes([
                header[0], header[1], header[2], header[3],
            ])),
            HeaderFormat::Decimal => header.iter().try_fold(0u32, |acc, &b| {
                if b.is_ascii_digit() {
                    Ok(acc * 10 + u32::from(b - b'0'))
                } else {
                    Err(RpcError::Protocol(format!(
                        "invalid byte 0x{:02x} in decimal header",
                        b
                    )))
                }
            }),
        }
    }
}

/// Check a payload length against the configured limit.
#[inline]
pub fn validate_payload_len(len: usize, max_payload_size: u32) -> Result<u32> {
    if len > max_payload_size as usize {
        return Err(RpcError::PayloadTooLarge {
            size: len,
            max: max_payload_size as usize,
        });
    }
    Ok(len as u32)
}

/// Clamp a configured limit to what the header format can express.
#[inline]
pub fn effective_max_payload(format: HeaderFormat, configured: u32) -> u32 {
    configured.min(format.max_encodable())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(format: HeaderFormat, len: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        format.encode_into(len, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_binary_header_is_big_endian() {
        assert_eq!(encode(HeaderFormat::Binary, 0x0102_0304), vec![1, 2, 3, 4]);
        assert_eq!(HeaderFormat::Binary.decode(&[0, 0, 1, 0]).unwrap(), 256);
    }

    #[test]
    fn test_decimal_header_zero_padded() {
        assert_eq!(encode(HeaderFormat::Decimal, 42), b"0000042".to_vec());
        assert_eq!(
            encode(HeaderFormat::Decimal, DECIMAL_MAX_PAYLOAD_SIZE),
            b"9999999".to_vec()
        );
        assert_eq!(HeaderFormat::Decimal.decode(b"0001234").unwrap(), 1234);
    }

    #[test]
    fn test_decimal_header_rejects_non_digits() {
        let err = HeaderFormat::Decimal.decode(b"00a1234").unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[test]
    fn test_decode_wrong_width() {
        assert!(HeaderFormat::Binary.decode(&[0, 0]).is_err());
        assert!(HeaderFormat::Decimal.decode(b"0000").is_err());
    }

    #[test]
    fn test_from_width() {
        assert_eq!(HeaderFormat::from_width(4).unwrap(), HeaderFormat::Binary);
        assert_eq!(HeaderFormat::from_width(7).unwrap(), HeaderFormat::Decimal);
        assert!(matches!(
            HeaderFormat::from_width(2),
            Err(RpcError::Config(_))
        ));
    }

    #[test]
    fn test_validate_payload_len() {
        assert_eq!(validate_payload_len(10, 10).unwrap(), 10);
        let err = validate_payload_len(11, 10).unwrap_err();
        assert!(matches!(
            err,
            RpcError::PayloadTooLarge { size: 11, max: 10 }
        ));
    }

    #[test]
    fn test_effective_max_payload_clamps_decimal() {
        assert_eq!(
            effective_max_payload(HeaderFormat::Decimal, u32::MAX),
            DECIMAL_MAX_PAYLOAD_SIZE
        );
        assert_eq!(effective_max_payload(HeaderFormat::Binary, 100), 100);
    }
}
