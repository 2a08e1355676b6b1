//! The seam between protocols and transports
//!
//! Transports (sockets, pipes, the in-memory pair in [`crate::memory`]) live
//! outside this crate. They drive a protocol through the callback traits
//! below and are driven by it through [`Transport`]. Callbacks run to
//! completion on the hub thread and never suspend.

use crate::error::ProtocolError;
use std::net::SocketAddr;
use std::rc::Rc;

/// Outbound calls a protocol makes on its transport
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Queue `data` for sending
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Queue every buffer in `lines` for sending, in order
    fn writelines(&self, lines: &[Vec<u8>]) -> Result<(), ProtocolError>;

    /// Shut down the write direction
    fn write_eof(&self) -> Result<(), ProtocolError>;

    /// Close the transport; it reports `connection_lost` when done
    fn close(&self);

    /// Stop delivering `data_received` until `resume_reading`
    fn pause_reading(&self);

    fn resume_reading(&self);
}

/// Shared handle to a transport
pub type TransportRef = Rc<dyn Transport>;

/// Callbacks every protocol receives from its transport
pub trait Protocol {
    fn connection_made(&self, transport: TransportRef);

    /// The connection is gone; `error` is `None` on a clean close
    fn connection_lost(&self, error: Option<ProtocolError>);

    /// The transport's write buffer went above its high watermark
    fn pause_writing(&self);

    /// The transport's write buffer drained below its low watermark
    fn resume_writing(&self);
}

/// Callbacks of byte-stream transports
pub trait StreamCallbacks: Protocol {
    fn data_received(&self, data: &[u8]);

    fn eof_received(&self);
}

/// Callbacks of datagram transports
pub trait DatagramCallbacks: Protocol {
    fn datagram_received(&self, data: &[u8], addr: SocketAddr);

    fn error_received(&self, error: ProtocolError);
}
