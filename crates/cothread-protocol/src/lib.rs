//! # cothread-protocol
//!
//! Blocking, backpressure-aware protocols for tasks running on a hub.
//!
//! A transport (socket, pipe, the in-memory pair in [`memory`]) drives a
//! protocol through callbacks that never suspend. Tasks use the protocol
//! through switchpoints that do:
//!
//! ```text
//!   transport ──data_received/pause_writing/connection_lost──► protocol
//!                                                                 │
//!            ◄──write/close/pause_reading/resume_reading──────────┤
//!                                                                 │
//!   task ──write().await / read().await / get_message().await ────┘
//! ```
//!
//! ## Modules
//!
//! - `state` - lifecycle, sticky error and watermarks shared by every protocol
//! - `stream` - byte-stream protocol with blocking read and write
//! - `message` - decoded messages, dispatched to a handler task
//! - `datagram` - connectionless sibling without flow control
//! - `codec` - `Decoder` trait and `LineDecoder`
//! - `memory` - in-memory pipe transport

pub mod codec;
pub mod datagram;
pub mod error;
pub mod memory;
pub mod message;
pub mod state;
pub mod stream;
pub mod transport;

// Re-exports
pub use codec::{Decoder, LineDecoder};
pub use datagram::DatagramProtocol;
pub use error::{Condition, ProtocolError, ProtocolResult};
pub use memory::{pipe, pipe_with_config, MemoryTransport, PipeConfig};
pub use message::{MessageHandler, MessageProtocol, MessageProtocolBuilder};
pub use state::{ConnectionState, ReadBufferLimits};
pub use stream::StreamProtocol;
pub use transport::{DatagramCallbacks, Protocol, StreamCallbacks, Transport, TransportRef};
