//! Binary layout of a frame on the port.
//!
//! ```text
//! ┌─────────┬──────┬──────────────┬──────────┬──────────┬─────────────┬─────────┐
//! │ version │ kind │ message id   │ sequence │ total    │ payload len │ payload │
//! │ u8      │ u8   │ 16 bytes     │ u32 BE   │ u32 BE   │ u32 BE      │ ...     │
//! └─────────┴──────┴──────────────┴──────────┴──────────┴─────────────┴─────────┘
//! ```
//!
//! The explicit payload length lets the decoder reject truncated or
//! padded units instead of reassembling garbage.

use crate::chunk::Frame;
use crate::envelope::EnvelopeKind;
use crate::error::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use relay_types::MessageId;

pub const WIRE_VERSION: u8 = 1;

/// Bytes preceding the payload in every wire unit.
pub const HEADER_LEN: usize = 1 + 1 + MessageId::LEN + 4 + 4 + 4;

/// Serializes one frame with its envelope kind.
///
/// # Errors
///
/// [`TransportError::MessageTooLarge`] when the payload overflows the
/// 32-bit length field.
pub fn encode(kind: EnvelopeKind, frame: &Frame) -> Result<Bytes, TransportError> {
    let payload_len =
        u32::try_from(frame.payload.len()).map_err(|_| TransportError::MessageTooLarge {
            size: frame.payload.len(),
            limit: u32::MAX as usize,
        })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + frame.payload.len());
    buf.put_u8(WIRE_VERSION);
    buf.put_u8(kind.as_byte());
    buf.put_slice(frame.message_id.as_bytes());
    buf.put_u32(frame.sequence);
    buf.put_u32(frame.total_chunks);
    buf.put_u32(payload_len);
    buf.put_slice(&frame.payload);
    Ok(buf.freeze())
}

/// Parses a wire unit. The returned payload shares `unit`'s buffer.
///
/// # Errors
///
/// - [`TransportError::MalformedUnit`] for short units and unknown
///   versions or kinds, where no message id can be trusted
/// - [`TransportError::MalformedFrame`] when the declared payload length
///   disagrees with the bytes carried; the error names the message id
pub fn decode(mut unit: Bytes) -> Result<(EnvelopeKind, Frame), TransportError> {
    if unit.len() < HEADER_LEN {
        return Err(TransportError::MalformedUnit(format!(
            "{} bytes is shorter than the {HEADER_LEN}-byte header",
            unit.len()
        )));
    }

    let version = unit.get_u8();
    if version != WIRE_VERSION {
        return Err(TransportError::MalformedUnit(format!(
            "unsupported wire version {version}"
        )));
    }
    let kind_byte = unit.get_u8();
    let kind = EnvelopeKind::from_byte(kind_byte)
        .ok_or_else(|| TransportError::MalformedUnit(format!("unknown envelope kind {kind_byte}")))?;

    let mut id = [0u8; MessageId::LEN];
    unit.copy_to_slice(&mut id);
    let message_id = MessageId::from_bytes(id);
    let sequence = unit.get_u32();
    let total_chunks = unit.get_u32();
    let payload_len = unit.get_u32() as usize;

    if unit.len() != payload_len {
        return Err(TransportError::malformed(
            message_id,
            format!("header declares {payload_len} payload bytes, unit carries {}", unit.len()),
        ));
    }

    Ok((
        kind,
        Frame {
            message_id,
            sequence,
            total_chunks,
            payload: unit,
        },
    ))
}
