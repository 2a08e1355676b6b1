//! In-memory stream transport
//!
//! [`pipe`] connects two stream protocols on the current hub. Bytes written
//! on one side are delivered to the other side's `data_received` on a
//! later loop pass, in order. Each side has a write buffer (the bytes in
//! flight towards its peer) with watermarks that drive `pause_writing` and
//! `resume_writing`, and `pause_reading` holds delivery until
//! `resume_reading`.
//!
//! The pipe keeps both protocols alive until it is closed.

use crate::error::ProtocolError;
use crate::transport::{StreamCallbacks, Transport};
use cothread_runtime::run_callback;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::{trace, warn};

/// Write buffer watermarks of a pipe, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeConfig {
    pub write_high: usize,
    pub write_low: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            write_high: 65536,
            write_low: 16384,
        }
    }
}

enum Chunk {
    Data(Vec<u8>),
    Eof,
}

/// One side of the pipe
struct Endpoint {
    protocol: RefCell<Option<Rc<dyn StreamCallbacks>>>,
    /// Written by the peer, not yet delivered to `protocol`
    inbound: RefCell<VecDeque<Chunk>>,
    inbound_bytes: Cell<usize>,
    reading: Cell<bool>,
    /// `protocol` was told to pause writing
    writing_paused: Cell<bool>,
    eof_written: Cell<bool>,
    delivery_scheduled: Cell<bool>,
}

impl Endpoint {
    fn new(protocol: Rc<dyn StreamCallbacks>) -> Self {
        Self {
            protocol: RefCell::new(Some(protocol)),
            inbound: RefCell::new(VecDeque::new()),
            inbound_bytes: Cell::new(0),
            reading: Cell::new(true),
            writing_paused: Cell::new(false),
            eof_written: Cell::new(false),
            delivery_scheduled: Cell::new(false),
        }
    }

    fn protocol(&self) -> Option<Rc<dyn StreamCallbacks>> {
        self.protocol.borrow().clone()
    }
}

struct Pipe {
    ends: [Endpoint; 2],
    closed: Cell<bool>,
    config: PipeConfig,
}

impl Pipe {
    fn push(self: &Rc<Self>, from: usize, chunk: Chunk) -> Result<(), ProtocolError> {
        let peer = &self.ends[1 - from];
        if let Chunk::Data(data) = &chunk {
            peer.inbound_bytes.set(peer.inbound_bytes.get() + data.len());
        }
        peer.inbound.borrow_mut().push_back(chunk);
        self.schedule_delivery(1 - from)?;

        let writer = &self.ends[from];
        if peer.inbound_bytes.get() >= self.config.write_high && !writer.writing_paused.get() {
            writer.writing_paused.set(true);
            trace!(side = from, "write buffer above high watermark");
            if let Some(protocol) = writer.protocol() {
                protocol.pause_writing();
            }
        }
        Ok(())
    }

    fn schedule_delivery(self: &Rc<Self>, to: usize) -> Result<(), ProtocolError> {
        let end = &self.ends[to];
        if end.delivery_scheduled.replace(true) {
            return Ok(());
        }
        let pipe = Rc::clone(self);
        run_callback(move || pipe.deliver(to)).map_err(|e| {
            end.delivery_scheduled.set(false);
            ProtocolError::Internal(e.to_string())
        })
    }

    /// Hand inbound chunks to the protocol of side `to`
    fn deliver(&self, to: usize) {
        let end = &self.ends[to];
        end.delivery_scheduled.set(false);

        while !self.closed.get() && end.reading.get() {
            let Some(chunk) = end.inbound.borrow_mut().pop_front() else {
                break;
            };
            let Some(protocol) = end.protocol() else {
                break;
            };
            match chunk {
                Chunk::Data(data) => {
                    end.inbound_bytes.set(end.inbound_bytes.get() - data.len());
                    protocol.data_received(&data);
                }
                Chunk::Eof => protocol.eof_received(),
            }
        }

        let writer = &self.ends[1 - to];
        if writer.writing_paused.get() && end.inbound_bytes.get() <= self.config.write_low {
            writer.writing_paused.set(false);
            trace!(side = 1 - to, "write buffer below low watermark");
            if let Some(protocol) = writer.protocol() {
                protocol.resume_writing();
            }
        }
    }

    /// Report the loss to both sides and let go of them
    fn shutdown(&self) {
        for end in &self.ends {
            end.inbound.borrow_mut().clear();
            end.inbound_bytes.set(0);
            let protocol = end.protocol.borrow_mut().take();
            if let Some(protocol) = protocol {
                protocol.connection_lost(None);
            }
        }
    }
}

/// One end of an in-memory pipe
pub struct MemoryTransport {
    pipe: Rc<Pipe>,
    side: usize,
}

impl MemoryTransport {
    pub fn is_closed(&self) -> bool {
        self.pipe.closed.get()
    }

    /// Bytes written on this side and not yet delivered to the peer
    pub fn write_buffer_size(&self) -> usize {
        self.pipe.ends[1 - self.side].inbound_bytes.get()
    }

    fn check_writable(&self) -> Result<(), ProtocolError> {
        if self.pipe.closed.get() || self.pipe.ends[self.side].eof_written.get() {
            return Err(ProtocolError::Closing);
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        self.check_writable()?;
        if data.is_empty() {
            return Ok(());
        }
        self.pipe.push(self.side, Chunk::Data(data.to_vec()))
    }

    fn writelines(&self, lines: &[Vec<u8>]) -> Result<(), ProtocolError> {
        for line in lines {
            self.write(line)?;
        }
        Ok(())
    }

    fn write_eof(&self) -> Result<(), ProtocolError> {
        self.check_writable()?;
        self.pipe.ends[self.side].eof_written.set(true);
        self.pipe.push(self.side, Chunk::Eof)
    }

    fn close(&self) {
        if self.pipe.closed.replace(true) {
            return;
        }
        trace!(side = self.side, "closing pipe");
        let pipe = Rc::clone(&self.pipe);
        if let Err(e) = run_callback(move || pipe.shutdown()) {
            warn!(error = %e, "no hub to report pipe closure on, reporting inline");
            self.pipe.shutdown();
        }
    }

    fn pause_reading(&self) {
        self.pipe.ends[self.side].reading.set(false);
    }

    fn resume_reading(&self) {
        let end = &self.pipe.ends[self.side];
        if end.reading.replace(true) {
            return;
        }
        if let Err(e) = self.pipe.schedule_delivery(self.side) {
            warn!(error = %e, "cannot resume pipe delivery");
        }
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("side", &self.side)
            .field("closed", &self.is_closed())
            .field("write_buffer_size", &self.write_buffer_size())
            .finish()
    }
}

/// Connect `a` and `b` with default watermarks
///
/// Both protocols get `connection_made` before this returns.
pub fn pipe<A, B>(a: A, b: B) -> (Rc<MemoryTransport>, Rc<MemoryTransport>)
where
    A: StreamCallbacks + 'static,
    B: StreamCallbacks + 'static,
{
    pipe_with_config(a, b, PipeConfig::default())
}

pub fn pipe_with_config<A, B>(a: A, b: B, config: PipeConfig) -> (Rc<MemoryTransport>, Rc<MemoryTransport>)
where
    A: StreamCallbacks + 'static,
    B: StreamCallbacks + 'static,
{
    let a: Rc<dyn StreamCallbacks> = Rc::new(a);
    let b: Rc<dyn StreamCallbacks> = Rc::new(b);
    let pipe = Rc::new(Pipe {
        ends: [Endpoint::new(Rc::clone(&a)), Endpoint::new(Rc::clone(&b))],
        closed: Cell::new(false),
        config,
    });
    let ta = Rc::new(MemoryTransport {
        pipe: Rc::clone(&pipe),
        side: 0,
    });
    let tb = Rc::new(MemoryTransport { pipe, side: 1 });
    a.connection_made(ta.clone());
    b.connection_made(tb.clone());
    (ta, tb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Condition;
    use crate::state::ReadBufferLimits;
    use crate::stream::StreamProtocol;
    use cothread_runtime::{Hub, HubConfig};

    fn hub() -> Hub {
        Hub::new(HubConfig::new()).unwrap()
    }

    #[test]
    fn test_bytes_flow_both_ways() {
        let hub = hub();
        let client = StreamProtocol::new();
        let server = StreamProtocol::new();
        let _ = pipe(client.clone(), server.clone());

        let (c, s) = (client.clone(), server.clone());
        let echoed = hub.block_on(async move {
            c.write(b"hello").await.unwrap();
            let request = s.read(64, None).await.unwrap();
            s.write(&request).await.unwrap();
            s.write_eof().await.unwrap();
            let reply = c.read(64, None).await.unwrap();
            let eof = c.read(64, None).await.unwrap();
            (reply, eof)
        });
        assert_eq!(echoed, (b"hello".to_vec(), Vec::new()));
    }

    #[test]
    fn test_close_reports_loss_to_both_sides() {
        let hub = hub();
        let client = StreamProtocol::new();
        let server = StreamProtocol::new();
        let (client_end, _) = pipe(client.clone(), server.clone());

        let c = client.clone();
        hub.block_on(async move { c.close().await.unwrap() });

        assert!(client_end.is_closed());
        assert!(client.state().is_closed());
        assert!(server.state().is_closed());
        assert_eq!(client.state().error(), None);

        let s = server.clone();
        let result = hub.block_on(async move { s.write(b"late").await });
        assert_eq!(result, Err(Condition::Protocol(ProtocolError::Closing)));
    }

    #[test]
    fn test_write_watermarks() {
        let hub = hub();
        let client = StreamProtocol::new();
        let server = StreamProtocol::new();
        let config = PipeConfig {
            write_high: 4,
            write_low: 2,
        };
        let (client_end, _) = pipe_with_config(client.clone(), server.clone(), config);

        client_end.write(b"12345").unwrap();
        assert_eq!(client_end.write_buffer_size(), 5);
        assert!(!client.state().is_writable());

        hub.run_until_idle();
        assert_eq!(client_end.write_buffer_size(), 0);
        assert!(client.state().is_writable());
        assert_eq!(server.buffered(), 5);
    }

    #[test]
    fn test_read_backpressure_holds_delivery() {
        let hub = hub();
        let client = StreamProtocol::new();
        let server = StreamProtocol::with_limits(ReadBufferLimits::new(4, Some(2)));
        let (client_end, _) = pipe(client.clone(), server.clone());

        client_end.write(b"abcd").unwrap();
        hub.run_until_idle();
        assert!(!server.state().is_reading());

        client_end.write(b"ef").unwrap();
        hub.run_until_idle();
        assert_eq!(server.buffered(), 4);
        assert_eq!(client_end.write_buffer_size(), 2);

        let s = server.clone();
        let first = hub.block_on(async move { s.read(3, None).await.unwrap() });
        assert_eq!(first, b"abc");
        hub.run_until_idle();
        assert!(server.state().is_reading());
        assert_eq!(server.buffered(), 3);
        assert_eq!(client_end.write_buffer_size(), 0);
    }
}
