//! Channel configuration.
//!
//! [`ChannelConfig`] is the runtime form, built with fluent setters.
//! [`ChannelOptions`] is the serde-loadable form, for configs that arrive
//! as JSON:
//!
//! ```text
//! { "timeoutMs": 5000,
//!   "encoderOptions": { "headerSize": 4, "maxPayloadSize": 1048576, "poolSize": 4194320 } }
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use udsocket_rpc::config::{ChannelConfig, ChannelOptions};
//! use udsocket_rpc::protocol::HeaderFormat;
//!
//! let config = ChannelConfig::new()
//!     .timeout(Duration::from_secs(1))
//!     .header_format(HeaderFormat::Decimal);
//! assert_eq!(config.timeout, Duration::from_secs(1));
//!
//! let options: ChannelOptions =
//!     serde_json::from_str(r#"{"timeoutMs": 250, "encoderOptions": {"headerSize": 7}}"#).unwrap();
//! let config = options.into_config().unwrap();
//! assert_eq!(config.header_format, HeaderFormat::Decimal);
//! ```

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::{json_serializer, Serializer};
use crate::error::{Result, RpcError};
use crate::protocol::{
    default_arena_size, FrameBuffer, FrameEncoder, HeaderFormat, DEFAULT_MAX_PAYLOAD_SIZE,
};
use crate::writer::WriterConfig;

/// Default call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default socket read buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Per-channel settings. Cloned into every channel a listener accepts.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Deadline for each outgoing call.
    pub timeout: Duration,
    /// Largest payload accepted or produced.
    pub max_payload_size: u32,
    /// Length header layout; both peers must agree.
    pub header_format: HeaderFormat,
    /// Encoder arena size; `None` sizes it from the payload limit.
    pub arena_size: Option<usize>,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
    /// Writer task settings.
    pub writer: WriterConfig,
    /// Handlers allowed to run at once; `None` is unlimited.
    pub max_concurrent_handlers: Option<usize>,
    /// Fixed id seed; `None` uses the process seed.
    pub id_seed: Option<u64>,
    /// Envelope serializer for the write path.
    pub serializer: Serializer,
}

impl ChannelConfig {
    /// Configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the call timeout.
    ///
    /// Default: 5000 ms
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum payload size.
    ///
    /// Default: 1 MiB
    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Set the header layout.
    ///
    /// Default: [`HeaderFormat::Binary`]
    pub fn header_format(mut self, format: HeaderFormat) -> Self {
        self.header_format = format;
        self
    }

    /// Set the encoder arena size in bytes.
    pub fn arena_size(mut self, size: usize) -> Self {
        self.arena_size = Some(size);
        self
    }

    /// Set the socket read buffer size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer.channel_capacity = capacity;
        self
    }

    /// Set the maximum frames per vectored write.
    ///
    /// Default: 64
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.writer.max_batch_size = size;
        self
    }

    /// Limit how many handlers may run concurrently.
    ///
    /// Requests over the limit are answered with `EBUSY`.
    /// Default: unlimited
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = Some(limit);
        self
    }

    /// Use a fixed seed for call ids instead of the process seed.
    pub fn id_seed(mut self, seed: u64) -> Self {
        self.id_seed = Some(seed);
        self
    }

    /// Replace the envelope serializer.
    pub fn serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Build from serde-loaded options.
    pub fn from_options(options: &ChannelOptions) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = options.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }

        let encoder = &options.encoder_options;
        if let Some(width) = encoder.header_size {
            config.header_format = HeaderFormat::from_width(width)?;
        }
        if let Some(max) = encoder.max_payload_size {
            config.max_payload_size = max;
        }
        config.arena_size = encoder.pool_size;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no channel can run with.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(RpcError::Config("timeout must be positive".into()));
        }
        if self.max_payload_size == 0 {
            return Err(RpcError::Config("max payload size must be positive".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(RpcError::Config("read buffer size must be positive".into()));
        }
        if self.max_concurrent_handlers == Some(0) {
            return Err(RpcError::Config(
                "max concurrent handlers must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Arena size actually used by the encoder.
    pub fn effective_arena_size(&self) -> usize {
        self.arena_size
            .unwrap_or_else(|| default_arena_size(self.header_format, self.max_payload_size))
    }

    pub(crate) fn encoder(&self) -> FrameEncoder {
        FrameEncoder::with_arena(
            self.header_format,
            self.max_payload_size,
            self.effective_arena_size(),
        )
    }

    pub(crate) fn decoder(&self) -> FrameBuffer {
        FrameBuffer::with_format(self.header_format, self.max_payload_size)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            header_format: HeaderFormat::Binary,
            arena_size: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            writer: WriterConfig::default(),
            max_concurrent_handlers: None,
            id_seed: None,
            serializer: json_serializer(),
        }
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("timeout", &self.timeout)
            .field("max_payload_size", &self.max_payload_size)
            .field("header_format", &self.header_format)
            .field("arena_size", &self.arena_size)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("writer", &self.writer)
            .field("max_concurrent_handlers", &self.max_concurrent_handlers)
            .field("id_seed", &self.id_seed)
            .finish_non_exhaustive()
    }
}

/// Serde form of [`ChannelConfig`]; unset fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOptions {
    /// Call timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Framing settings.
    #[serde(default)]
    pub encoder_options: EncoderOptions,
}

/// Framing part of [`ChannelOptions`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderOptions {
    /// Header width: 4 (binary) or 7 (decimal).
    #[serde(default)]
    pub header_size: Option<usize>,
    /// Largest payload in bytes.
    #[serde(default)]
    pub max_payload_size: Option<u32>,
    /// Encoder arena size in bytes.
    #[serde(default)]
    pub pool_size: Option<usize>,
}

impl ChannelOptions {
    /// Convert into a runtime configuration.
    pub fn into_config(self) -> Result<ChannelConfig> {
        ChannelConfig::from_options(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(config.max_payload_size, 1024 * 1024);
        assert_eq!(config.header_format, HeaderFormat::Binary);
        assert_eq!(config.read_buffer_size, 64 * 1024);
        assert_eq!(config.writer.channel_capacity, 1024);
        assert_eq!(config.writer.max_batch_size, 64);
        assert!(config.max_concurrent_handlers.is_none());
        assert!(config.id_seed.is_none());
        assert_eq!(config.effective_arena_size(), (1024 * 1024 + 4) * 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fluent_setters() {
        let config = ChannelConfig::new()
            .timeout(Duration::from_millis(10))
            .max_payload_size(256)
            .header_format(HeaderFormat::Decimal)
            .arena_size(4096)
            .read_buffer_size(512)
            .channel_capacity(8)
            .max_batch_size(2)
            .max_concurrent_handlers(3)
            .id_seed(42);

        assert_eq!(config.timeout, Duration::from_millis(10));
        assert_eq!(config.max_payload_size, 256);
        assert_eq!(config.header_format, HeaderFormat::Decimal);
        assert_eq!(config.effective_arena_size(), 4096);
        assert_eq!(config.read_buffer_size, 512);
        assert_eq!(config.writer.channel_capacity, 8);
        assert_eq!(config.writer.max_batch_size, 2);
        assert_eq!(config.max_concurrent_handlers, Some(3));
        assert_eq!(config.id_seed, Some(42));
    }

    #[test]
    fn test_options_from_json() {
        let options: ChannelOptions = serde_json::from_str(
            r#"{"timeoutMs": 1500,
                "encoderOptions": {"headerSize": 7, "maxPayloadSize": 2048, "poolSize": 8192}}"#,
        )
        .unwrap();

        let config = options.into_config().unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.header_format, HeaderFormat::Decimal);
        assert_eq!(config.max_payload_size, 2048);
        assert_eq!(config.effective_arena_size(), 8192);
    }

    #[test]
    fn test_empty_options_keep_defaults() {
        let options: ChannelOptions = serde_json::from_str("{}").unwrap();
        let config = options.into_config().unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.header_format, HeaderFormat::Binary);
    }

    #[test]
    fn test_bad_header_size_is_config_error() {
        let options: ChannelOptions =
            serde_json::from_str(r#"{"encoderOptions": {"headerSize": 2}}"#).unwrap();
        assert!(matches!(options.into_config(), Err(RpcError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(ChannelConfig::new()
            .timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ChannelConfig::new().max_payload_size(0).validate().is_err());
        assert!(ChannelConfig::new()
            .max_concurrent_handlers(0)
            .validate()
            .is_err());
    }
}
