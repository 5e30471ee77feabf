//! Transport errors.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | `InvalidFrameSize` | `PORT_INVALID_FRAME_SIZE` | No |
//! | `MalformedFrame` | `PORT_MALFORMED_FRAME` | No |
//! | `TooManyInFlight` | `PORT_TOO_MANY_IN_FLIGHT` | Yes |
//! | `ReassemblyAborted` | `PORT_REASSEMBLY_ABORTED` | Yes |
//! | `MessageTooLarge` | `PORT_MESSAGE_TOO_LARGE` | No |
//! | `PortClosed` | `PORT_CLOSED` | Yes |
//! | `NotOpen` | `PORT_NOT_OPEN` | Yes |
//! | `Timeout` | `PORT_TIMEOUT` | Yes |
//! | `Remote` | `PORT_REMOTE_FAILED` | No |
//! | `Bus` | `PORT_BUS` | No |
//! | `Encoding` | `PORT_ENCODING` | No |
//! | `Config` | `PORT_CONFIG` | No |

use crate::config::ConfigError;
use relay_bus::BusError;
use relay_types::{ErrorCode, MessageId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a partial reassembly was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Frames stopped arriving before the message completed.
    Timeout,
    /// The port disconnected or was closed locally.
    Disconnected,
    /// Buffering the next frame would exceed the per-port byte budget.
    BufferLimit,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timed out",
            Self::Disconnected => "port disconnected",
            Self::BufferLimit => "buffer limit exceeded",
        })
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame payload size must be at least 1 byte, got {size}")]
    InvalidFrameSize { size: usize },

    #[error("malformed frame for {message_id}: {reason}")]
    MalformedFrame { message_id: MessageId, reason: String },

    /// Undecodable wire unit, before a message id could be read.
    #[error("malformed wire unit: {0}")]
    MalformedUnit(String),

    #[error("too many partial messages in flight (limit {limit})")]
    TooManyInFlight { limit: usize },

    #[error("reassembly of {message_id} aborted: {reason}")]
    ReassemblyAborted {
        message_id: MessageId,
        reason: AbortReason,
    },

    #[error("message of {size} bytes exceeds port limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("port closed")]
    PortClosed,

    #[error("port is not open yet")]
    NotOpen,

    #[error("no result for {message_id} after {after_ms}ms")]
    Timeout { message_id: MessageId, after_ms: u64 },

    /// The far side answered a call with an error.
    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("envelope encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TransportError {
    pub(crate) fn malformed(message_id: MessageId, reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message_id,
            reason: reason.into(),
        }
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidFrameSize { .. } => "PORT_INVALID_FRAME_SIZE",
            Self::MalformedFrame { .. } | Self::MalformedUnit(_) => "PORT_MALFORMED_FRAME",
            Self::TooManyInFlight { .. } => "PORT_TOO_MANY_IN_FLIGHT",
            Self::ReassemblyAborted { .. } => "PORT_REASSEMBLY_ABORTED",
            Self::MessageTooLarge { .. } => "PORT_MESSAGE_TOO_LARGE",
            Self::PortClosed => "PORT_CLOSED",
            Self::NotOpen => "PORT_NOT_OPEN",
            Self::Timeout { .. } => "PORT_TIMEOUT",
            Self::Remote { .. } => "PORT_REMOTE_FAILED",
            Self::Bus(_) => "PORT_BUS",
            Self::Encoding(_) => "PORT_ENCODING",
            Self::Config(_) => "PORT_CONFIG",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TooManyInFlight { .. }
                | Self::ReassemblyAborted { .. }
                | Self::PortClosed
                | Self::NotOpen
                | Self::Timeout { .. }
        )
    }
}
