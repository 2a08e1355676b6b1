//! Datagram protocol
//!
//! Datagrams are not flow-controlled: there is no read buffer to throttle,
//! so the protocol only forwards what arrives and remembers the first
//! error the transport reports.

use crate::error::{ProtocolError, ProtocolResult};
use crate::state::ConnectionState;
use crate::transport::{DatagramCallbacks, Protocol, TransportRef};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use tracing::{trace, warn};

type DatagramHandler = Box<dyn Fn(&DatagramProtocol, &[u8], SocketAddr)>;

/// Datagram protocol handle
///
/// The handler runs inside the transport callback and must not block.
#[derive(Clone)]
pub struct DatagramProtocol {
    inner: Rc<DatagramInner>,
}

struct DatagramInner {
    state: ConnectionState,
    handler: Option<DatagramHandler>,
}

impl DatagramProtocol {
    /// Protocol that discards incoming datagrams
    pub fn new() -> Self {
        Self::from_handler(None)
    }

    /// Protocol that passes every datagram to `handler`
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&DatagramProtocol, &[u8], SocketAddr) + 'static,
    {
        Self::from_handler(Some(Box::new(handler)))
    }

    fn from_handler(handler: Option<DatagramHandler>) -> Self {
        Self {
            inner: Rc::new(DatagramInner {
                state: ConnectionState::default(),
                handler,
            }),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.inner.state
    }

    /// Switchpoint. Close the endpoint and wait until it is closed.
    pub async fn close(&self) -> ProtocolResult<()> {
        self.inner.state.close().await
    }
}

impl Default for DatagramProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DatagramProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramProtocol")
            .field("state", &self.inner.state)
            .field("handler", &self.inner.handler.is_some())
            .finish()
    }
}

impl Protocol for DatagramProtocol {
    fn connection_made(&self, transport: TransportRef) {
        self.inner.state.connection_made(transport);
    }

    fn connection_lost(&self, error: Option<ProtocolError>) {
        self.inner.state.connection_lost(error);
    }

    fn pause_writing(&self) {
        self.inner.state.pause_writing();
    }

    fn resume_writing(&self) {
        self.inner.state.resume_writing();
    }
}

impl DatagramCallbacks for DatagramProtocol {
    fn datagram_received(&self, data: &[u8], addr: SocketAddr) {
        trace!(%addr, len = data.len(), "datagram received");
        if let Some(handler) = &self.inner.handler {
            handler(self, data, addr);
        }
    }

    fn error_received(&self, error: ProtocolError) {
        warn!(%error, "datagram transport error");
        self.inner.state.set_error_once(error);
    }
}
