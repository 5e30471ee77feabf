//! The process boundary a [`PortTransport`](crate::PortTransport) talks over.
//!
//! A port moves opaque wire units in order between exactly two ends. It
//! has a per-unit size limit (Chromium: 64 MiB) and a disconnect signal
//! (the receiving half yields `None`); everything else lives above it.
//!
//! ```text
//!   background                               UI
//! ┌─────────────┐    units (≤ limit)    ┌─────────────┐
//! │ MemoryPort  │ ────────────────────▶ │ MemoryPort  │
//! │  sink/source│ ◀──────────────────── │  sink/source│
//! └─────────────┘                       └─────────────┘
//! ```

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default number of units buffered per direction of a [`MemoryPort`].
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Sending half of a port.
#[async_trait]
pub trait PortSink: Send + Sync + 'static {
    /// Posts one unit.
    ///
    /// # Errors
    ///
    /// [`TransportError::MessageTooLarge`] above the port's limit, or
    /// [`TransportError::PortClosed`] once the far end is gone.
    async fn post(&self, unit: Bytes) -> Result<(), TransportError>;
}

/// Receiving half of a port.
#[async_trait]
pub trait PortSource: Send + 'static {
    /// Next unit, or `None` once the far end disconnected.
    async fn recv(&mut self) -> Option<Bytes>;
}

/// A connected port that can be split into its two halves.
pub trait Port: Send + 'static {
    fn into_split(self) -> (Arc<dyn PortSink>, Box<dyn PortSource>);
}

/// One end of an in-process port pair.
///
/// Dropping an end disconnects it: the other end's source drains what
/// was already posted and then yields `None`.
pub struct MemoryPort {
    limit: usize,
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryPort {
    /// Creates two connected ends that reject units above `limit` bytes.
    #[must_use]
    pub fn pair(limit: usize, buffer_size: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(buffer_size);
        let (b_tx, a_rx) = mpsc::channel(buffer_size);
        (
            Self {
                limit,
                tx: a_tx,
                rx: a_rx,
            },
            Self {
                limit,
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Posts a raw unit from this end.
    ///
    /// # Errors
    ///
    /// See [`PortSink::post`].
    pub async fn post(&self, unit: Bytes) -> Result<(), TransportError> {
        post_limited(&self.tx, self.limit, unit).await
    }

    /// Receives a raw unit at this end.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl fmt::Debug for MemoryPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPort")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl Port for MemoryPort {
    fn into_split(self) -> (Arc<dyn PortSink>, Box<dyn PortSource>) {
        (
            Arc::new(MemorySink {
                limit: self.limit,
                tx: self.tx,
            }),
            Box::new(MemorySource { rx: self.rx }),
        )
    }
}

async fn post_limited(
    tx: &mpsc::Sender<Bytes>,
    limit: usize,
    unit: Bytes,
) -> Result<(), TransportError> {
    if unit.len() > limit {
        return Err(TransportError::MessageTooLarge {
            size: unit.len(),
            limit,
        });
    }
    tx.send(unit).await.map_err(|_| TransportError::PortClosed)
}

struct MemorySink {
    limit: usize,
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl PortSink for MemorySink {
    async fn post(&self, unit: Bytes) -> Result<(), TransportError> {
        post_limited(&self.tx, self.limit, unit).await
    }
}

struct MemorySource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl PortSource for MemorySource {
    async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
