//! What a logical message on the port means.
//!
//! The kind travels in every frame header; the body is the reassembled
//! payload. Call, result and event bodies are JSON. Snapshots are opaque
//! bytes handed to the owner untouched.

use crate::error::TransportError;
use relay_bus::BusError;
use relay_types::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Envelope kinds carried on the wire as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    ActionCall,
    ActionResult,
    Event,
    StateSnapshot,
}

impl EnvelopeKind {
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::ActionCall => 1,
            Self::ActionResult => 2,
            Self::Event => 3,
            Self::StateSnapshot => 4,
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::ActionCall),
            2 => Some(Self::ActionResult),
            3 => Some(Self::Event),
            4 => Some(Self::StateSnapshot),
            _ => None,
        }
    }
}

/// Body of an [`EnvelopeKind::ActionCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBody {
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

/// Error half of a [`CallOutcome`]: the local error code plus its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub code: String,
    pub message: String,
}

impl RemoteFailure {
    pub fn from_error<E: ErrorCode + fmt::Display>(err: &E) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<&BusError> for RemoteFailure {
    fn from(err: &BusError) -> Self {
        Self::from_error(err)
    }
}

/// Body of an [`EnvelopeKind::ActionResult`].
///
/// Serialized as `{"ok": <value>}` or `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok(Value),
    Error(RemoteFailure),
}

impl CallOutcome {
    pub(crate) fn into_result(self) -> Result<Value, TransportError> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error(RemoteFailure { code, message }) => {
                Err(TransportError::Remote { code, message })
            }
        }
    }
}

impl From<Result<Value, BusError>> for CallOutcome {
    fn from(result: Result<Value, BusError>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::Error(RemoteFailure::from(&err)),
        }
    }
}

/// Body of an [`EnvelopeKind::Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}
