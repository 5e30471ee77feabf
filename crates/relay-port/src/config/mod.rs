//! Transport configuration.
//!
//! # Layering
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌──────────────────────────────────────────┐
//! │  1. Environment variables (RELAY_*)      │
//! ├──────────────────────────────────────────┤
//! │  2. Config file (relay.toml)             │
//! ├──────────────────────────────────────────┤
//! │  3. Defaults                             │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Example Configuration
//!
//! ```toml
//! # relay.toml
//! max_message_size = 67108864      # 64 MiB, Chromium's port limit
//! reassembly_timeout_ms = 30000
//! purge_interval_ms = 1000
//! max_in_flight = 16
//! max_buffered_bytes = 268435456   # 256 MiB
//! call_timeout_ms = 60000
//! snapshot_buffer = 8
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `RELAY_MAX_MESSAGE_SIZE` | `max_message_size` |
//! | `RELAY_REASSEMBLY_TIMEOUT_MS` | `reassembly_timeout_ms` |
//! | `RELAY_MAX_IN_FLIGHT` | `max_in_flight` |
//! | `RELAY_MAX_BUFFERED_BYTES` | `max_buffered_bytes` |
//! | `RELAY_CALL_TIMEOUT_MS` | `call_timeout_ms` |

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::wire::HEADER_LEN;

/// Chromium rejects port messages above 64 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 26;

/// Transport limits and timings for one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest wire unit the port accepts, header included.
    pub max_message_size: usize,
    /// Partial reassemblies older than this are discarded.
    pub reassembly_timeout_ms: u64,
    /// How often the reader sweeps for expired reassemblies.
    pub purge_interval_ms: u64,
    /// Concurrent partial reassemblies allowed per port.
    pub max_in_flight: usize,
    /// Bytes buffered across all partial reassemblies of a port.
    pub max_buffered_bytes: usize,
    /// Remote action calls fail with a timeout after this long.
    pub call_timeout_ms: u64,
    /// Inbound snapshots queued before the reader waits on the consumer.
    pub snapshot_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            reassembly_timeout_ms: 30_000,
            purge_interval_ms: 1_000,
            max_in_flight: 16,
            max_buffered_bytes: 1 << 28,
            call_timeout_ms: 60_000,
            snapshot_buffer: 8,
        }
    }
}

impl TransportConfig {
    /// Payload bytes that fit in one frame after the wire header.
    #[must_use]
    pub fn max_frame_payload(&self) -> usize {
        self.max_message_size.saturating_sub(HEADER_LEN)
    }

    #[must_use]
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    #[must_use]
    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when a frame cannot carry at least one
    /// payload byte or overflows the wire length field, or when any limit
    /// or interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size <= HEADER_LEN {
            return Err(ConfigError::Invalid(format!(
                "max_message_size must exceed the {HEADER_LEN}-byte frame header, got {}",
                self.max_message_size
            )));
        }
        if u32::try_from(self.max_message_size).is_err() {
            return Err(ConfigError::Invalid(format!(
                "max_message_size must fit the 32-bit frame length field, got {}",
                self.max_message_size
            )));
        }
        let zeroes = [
            ("reassembly_timeout_ms", self.reassembly_timeout_ms == 0),
            ("purge_interval_ms", self.purge_interval_ms == 0),
            ("max_in_flight", self.max_in_flight == 0),
            ("max_buffered_bytes", self.max_buffered_bytes == 0),
            ("call_timeout_ms", self.call_timeout_ms == 0),
            ("snapshot_buffer", self.snapshot_buffer == 0),
        ];
        if let Some((field, _)) = zeroes.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TransportConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_frame_payload(), DEFAULT_MAX_MESSAGE_SIZE - HEADER_LEN);
    }

    #[test]
    fn frame_must_fit_header_plus_one_byte() {
        let mut config = TransportConfig {
            max_message_size: HEADER_LEN,
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());
        config.max_message_size = HEADER_LEN + 1;
        config.validate().unwrap();
        assert_eq!(config.max_frame_payload(), 1);
    }

    #[test]
    fn zero_limits_rejected() {
        let config = TransportConfig {
            max_in_flight: 0,
            ..TransportConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_in_flight"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: TransportConfig = toml::from_str("max_in_flight = 4").unwrap();
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.call_timeout_ms, TransportConfig::default().call_timeout_ms);
    }
}
