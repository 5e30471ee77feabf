//! Relay port transport.
//!
//! Moves bus traffic and full state snapshots between the background and
//! UI processes over a port that caps the size of one message.
//!
//! # Layers
//!
//! ```text
//! PortTransport ── calls, results, events, snapshots; Connecting → Open → Closed
//!       │
//!       ├── envelope   what a message means (call / result / event / snapshot)
//!       ├── ChunkCodec message → frames ≤ max frame size
//!       ├── Reassembler frames (any order, duplicates) → message
//!       ├── wire       frame ⇄ length-prefixed binary unit
//!       ▼
//! Port (PortSink + PortSource) ── MemoryPort in-process, or a real channel
//! ```
//!
//! # Frame Size
//!
//! A wire unit is [`wire::HEADER_LEN`] header bytes plus one frame's
//! payload, so the frame payload limit is
//! `TransportConfig::max_message_size - HEADER_LEN`.
//!
//! # Configuration
//!
//! [`TransportConfig`] is loaded with [`config::ConfigLoader`]: defaults,
//! then `relay.toml`, then `RELAY_*` environment variables.

mod chunk;
pub mod config;
pub mod envelope;
mod error;
mod port;
mod reassembly;
mod transport;
pub mod wire;

pub use chunk::{ChunkCodec, Frame};
pub use config::{ConfigError, ConfigLoader, TransportConfig};
pub use envelope::EnvelopeKind;
pub use error::{AbortReason, TransportError};
pub use port::{MemoryPort, Port, PortSink, PortSource, DEFAULT_BUFFER_SIZE};
pub use reassembly::{Aborted, Completed, Reassembler, ReassemblyLimits};
pub use transport::{DisconnectReason, PortState, PortTransport, Snapshot};
