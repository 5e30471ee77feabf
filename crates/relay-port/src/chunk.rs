//! Splitting a logical message into frames.
//!
//! Frames share the payload buffer: each one is a [`Bytes`] slice of the
//! message buffer, so chunking a large snapshot copies nothing until the wire
//! encoder writes the header.

use crate::error::TransportError;
use bytes::Bytes;
use relay_types::MessageId;

/// One chunk of a logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: MessageId,
    /// Zero-based position within the message.
    pub sequence: u32,
    /// Frame count of the whole message; identical across its frames.
    pub total_chunks: u32,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.sequence + 1 == self.total_chunks
    }
}

/// Splits messages into frames of at most `max_frame_size` payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCodec {
    max_frame_size: usize,
}

impl ChunkCodec {
    /// # Errors
    ///
    /// [`TransportError::InvalidFrameSize`] when `max_frame_size` is zero.
    pub fn new(max_frame_size: usize) -> Result<Self, TransportError> {
        if max_frame_size == 0 {
            return Err(TransportError::InvalidFrameSize { size: 0 });
        }
        Ok(Self { max_frame_size })
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Frames needed for a payload of `len` bytes. An empty payload still
    /// needs one frame.
    #[must_use]
    pub fn frame_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_frame_size).max(1)
    }

    /// Splits `payload` into ordered frames tagged with `message_id`.
    ///
    /// Concatenating the frame payloads in sequence order yields `payload`.
    ///
    /// # Errors
    ///
    /// [`TransportError::MessageTooLarge`] when the frame count would not
    /// fit the 32-bit sequence field.
    pub fn encode(&self, message_id: MessageId, payload: Bytes) -> Result<Vec<Frame>, TransportError> {
        let count = self.frame_count(payload.len());
        let total_chunks = u32::try_from(count).map_err(|_| TransportError::MessageTooLarge {
            size: payload.len(),
            limit: self.max_frame_size.saturating_mul(u32::MAX as usize),
        })?;

        if count == 1 {
            return Ok(vec![Frame {
                message_id,
                sequence: 0,
                total_chunks,
                payload,
            }]);
        }

        let frames = (0..total_chunks)
            .map(|sequence| {
                let start = sequence as usize * self.max_frame_size;
                let end = (start + self.max_frame_size).min(payload.len());
                Frame {
                    message_id,
                    sequence,
                    total_chunks,
                    payload: payload.slice(start..end),
                }
            })
            .collect();
        Ok(frames)
    }
}
