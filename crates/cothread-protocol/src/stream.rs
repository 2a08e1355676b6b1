//! Byte-stream protocol with blocking reads and writes

use crate::error::{ProtocolError, ProtocolResult};
use crate::state::{ConnectionState, ReadBufferLimits};
use crate::transport::{Protocol, StreamCallbacks, TransportRef};
use cothread_runtime::Gate;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Stream protocol handle
///
/// Cheap to clone; every clone refers to the same connection. Incoming
/// bytes are buffered until a task reads them, and the buffer size drives
/// read backpressure on the transport.
#[derive(Clone)]
pub struct StreamProtocol {
    inner: Rc<StreamInner>,
}

struct StreamInner {
    state: ConnectionState,
    buffer: RefCell<Vec<u8>>,
    eof: Cell<bool>,
    /// Set while a read would not block
    readable: Gate,
}

impl StreamProtocol {
    pub fn new() -> Self {
        Self::with_limits(ReadBufferLimits::default())
    }

    pub fn with_limits(limits: ReadBufferLimits) -> Self {
        Self {
            inner: Rc::new(StreamInner {
                state: ConnectionState::new(limits),
                buffer: RefCell::new(Vec::new()),
                eof: Cell::new(false),
                readable: Gate::new(),
            }),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.inner.state
    }

    /// Switchpoint. Write `data` once the transport accepts more.
    pub async fn write(&self, data: &[u8]) -> ProtocolResult<()> {
        self.inner.state.write(data).await
    }

    /// Switchpoint. Write every buffer of `lines`, in order.
    pub async fn writelines<I, B>(&self, lines: I) -> ProtocolResult<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let lines: Vec<Vec<u8>> = lines.into_iter().map(|l| l.as_ref().to_vec()).collect();
        self.inner.state.writelines(&lines).await
    }

    /// Switchpoint. Shut down the write direction.
    pub async fn write_eof(&self) -> ProtocolResult<()> {
        self.inner.state.write_eof().await
    }

    /// Switchpoint. Close the connection and wait until it is closed.
    pub async fn close(&self) -> ProtocolResult<()> {
        self.inner.state.close().await
    }

    /// Read up to `max` buffered bytes
    ///
    /// Switchpoint. Waits for input if none is buffered. Returns an empty
    /// buffer at end of input or after a clean close, and fails with the
    /// sticky error after the connection was lost with one. `timeout`
    /// bounds the whole call, not each wait.
    pub async fn read(&self, max: usize, timeout: Option<Duration>) -> ProtocolResult<Vec<u8>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            self.inner.readable.wait(remaining).await?;
            if max == 0 {
                return Ok(Vec::new());
            }
            let chunk = self.take_buffered(max);
            if !chunk.is_empty() {
                return Ok(chunk);
            }
            if self.inner.eof.get() {
                return Ok(Vec::new());
            }
            if let Some(e) = self.inner.state.error() {
                return Err(e.into());
            }
            if self.inner.state.is_closed() {
                return Ok(Vec::new());
            }
        }
    }

    /// Number of bytes received but not yet read
    pub fn buffered(&self) -> usize {
        self.inner.buffer.borrow().len()
    }

    pub fn at_eof(&self) -> bool {
        self.inner.eof.get()
    }

    fn take_buffered(&self, max: usize) -> Vec<u8> {
        let (chunk, remaining) = {
            let mut buffer = self.inner.buffer.borrow_mut();
            let n = max.min(buffer.len());
            let chunk: Vec<u8> = buffer.drain(..n).collect();
            (chunk, buffer.len())
        };
        if remaining == 0 && !self.inner.eof.get() && !self.inner.state.is_closed() {
            self.inner.readable.clear();
        }
        self.inner.state.update_read_buffer_size(remaining);
        chunk
    }
}

impl Default for StreamProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProtocol")
            .field("state", &self.inner.state)
            .field("buffered", &self.buffered())
            .field("eof", &self.at_eof())
            .finish()
    }
}

impl Protocol for StreamProtocol {
    fn connection_made(&self, transport: TransportRef) {
        self.inner.state.connection_made(transport);
    }

    fn connection_lost(&self, error: Option<ProtocolError>) {
        self.inner.state.connection_lost(error);
        self.inner.readable.set();
    }

    fn pause_writing(&self) {
        self.inner.state.pause_writing();
    }

    fn resume_writing(&self) {
        self.inner.state.resume_writing();
    }
}

impl StreamCallbacks for StreamProtocol {
    fn data_received(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let size = {
            let mut buffer = self.inner.buffer.borrow_mut();
            buffer.extend_from_slice(data);
            buffer.len()
        };
        self.inner.readable.set();
        self.inner.state.update_read_buffer_size(size);
    }

    fn eof_received(&self) {
        self.inner.eof.set(true);
        self.inner.readable.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Condition;
    use crate::transport::MockTransport;
    use cothread_runtime::{Hub, HubConfig};

    fn hub() -> Hub {
        Hub::new(HubConfig::new()).unwrap()
    }

    /// Mock transport that records every write
    fn recording_transport(log: &Rc<RefCell<Vec<Vec<u8>>>>) -> MockTransport {
        let mut transport = MockTransport::new();
        let writes = Rc::clone(log);
        transport.expect_write().returning_st(move |data| {
            writes.borrow_mut().push(data.to_vec());
            Ok(())
        });
        transport
    }

    #[test]
    fn test_write_forwards_to_transport() {
        let hub = hub();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut transport = recording_transport(&log);
        let lines = Rc::clone(&log);
        transport.expect_writelines().times(1).returning_st(move |batch| {
            lines.borrow_mut().extend(batch.iter().cloned());
            Ok(())
        });
        transport.expect_write_eof().times(1).returning(|| Ok(()));

        let protocol = StreamProtocol::new();
        protocol.connection_made(Rc::new(transport));

        let p = protocol.clone();
        hub.block_on(async move {
            p.write(b"GET /").await.unwrap();
            p.writelines([b"a\n".as_slice(), b"b\n".as_slice()]).await.unwrap();
            p.write_eof().await.unwrap();
        });

        assert_eq!(*log.borrow(), [b"GET /".to_vec(), b"a\n".to_vec(), b"b\n".to_vec()]);
    }

    #[test]
    fn test_writer_blocks_above_high_until_below_low() {
        let hub = hub();
        let log = Rc::new(RefCell::new(Vec::new()));
        let protocol = StreamProtocol::new();
        protocol.connection_made(Rc::new(recording_transport(&log)));

        protocol.pause_writing();
        let writer = {
            let p = protocol.clone();
            hub.spawn(async move { p.write(b"queued").await.unwrap() })
        };

        hub.run_until_idle();
        assert!(log.borrow().is_empty());
        assert!(writer.is_alive());

        // Repeated "above high" keeps it blocked
        protocol.pause_writing();
        hub.run_until_idle();
        assert!(log.borrow().is_empty());

        protocol.resume_writing();
        hub.run_until_idle();
        assert_eq!(*log.borrow(), [b"queued".to_vec()]);
        assert!(!writer.is_alive());
    }

    #[test]
    fn test_connection_lost_fails_pending_and_later_writes() {
        let hub = hub();
        let mut transport = MockTransport::new();
        transport.expect_write().never();
        transport.expect_close().times(1).return_const(());

        let protocol = StreamProtocol::new();
        protocol.connection_made(Rc::new(transport));
        protocol.pause_writing();

        let outcomes = Rc::new(RefCell::new(Vec::new()));
        {
            let (p, out) = (protocol.clone(), Rc::clone(&outcomes));
            hub.spawn(async move {
                let result = p.write(b"x").await;
                out.borrow_mut().push(("write", result));
            });
        }
        {
            let (p, out) = (protocol.clone(), Rc::clone(&outcomes));
            hub.spawn(async move {
                let result = p.close().await;
                out.borrow_mut().push(("close", result));
            });
        }
        hub.run_until_idle();
        assert!(outcomes.borrow().is_empty());

        let reset = ProtocolError::new("connection reset");
        protocol.connection_lost(Some(reset.clone()));
        hub.run_until_idle();

        let failed = Err(Condition::Protocol(reset.clone()));
        assert_eq!(outcomes.borrow().len(), 2);
        assert!(outcomes.borrow().contains(&("write", failed.clone())));
        assert!(outcomes.borrow().contains(&("close", Ok(()))));

        let p = protocol.clone();
        assert_eq!(hub.block_on(async move { p.write(b"late").await }), failed);
    }

    #[test]
    fn test_clean_loss_fails_writes_with_closing() {
        let hub = hub();
        let protocol = StreamProtocol::new();
        protocol.connection_made(Rc::new(MockTransport::new()));
        protocol.connection_lost(None);

        let p = protocol.clone();
        let result = hub.block_on(async move { p.write(b"x").await });
        assert_eq!(result, Err(Condition::Protocol(ProtocolError::Closing)));
    }

    #[test]
    fn test_read_applies_watermarks() {
        let hub = hub();
        let mut transport = MockTransport::new();
        transport.expect_pause_reading().times(1).return_const(());
        transport.expect_resume_reading().times(1).return_const(());

        let protocol = StreamProtocol::with_limits(ReadBufferLimits::new(4, Some(2)));
        protocol.connection_made(Rc::new(transport));

        protocol.data_received(b"hel");
        protocol.data_received(b"lo");
        assert!(!protocol.state().is_reading());

        let p = protocol.clone();
        let first = hub.block_on(async move { p.read(2, None).await });
        assert_eq!(first.unwrap(), b"he");
        assert!(!protocol.state().is_reading());

        let p = protocol.clone();
        let second = hub.block_on(async move { p.read(1, None).await });
        assert_eq!(second.unwrap(), b"l");
        assert!(protocol.state().is_reading());
        assert_eq!(protocol.buffered(), 2);
    }

    #[test]
    fn test_read_waits_for_data_then_eof() {
        let hub = hub();
        let protocol = StreamProtocol::new();
        protocol.connection_made(Rc::new(MockTransport::new()));

        let chunks = Rc::new(RefCell::new(Vec::new()));
        let reader = {
            let (p, chunks) = (protocol.clone(), Rc::clone(&chunks));
            hub.spawn(async move {
                loop {
                    let chunk = p.read(1024, None).await.unwrap();
                    let done = chunk.is_empty();
                    chunks.borrow_mut().push(chunk);
                    if done {
                        break;
                    }
                }
            })
        };

        hub.run_until_idle();
        assert!(chunks.borrow().is_empty());

        protocol.data_received(b"ping");
        hub.run_until_idle();
        protocol.eof_received();
        hub.run_until_idle();

        assert_eq!(*chunks.borrow(), [b"ping".to_vec(), Vec::new()]);
        assert!(!reader.is_alive());
    }

    #[test]
    fn test_read_timeout_and_error() {
        let hub = hub();
        let protocol = StreamProtocol::new();
        protocol.connection_made(Rc::new(MockTransport::new()));

        let p = protocol.clone();
        let result = hub.block_on(async move { p.read(16, Some(Duration::from_millis(10))).await });
        assert_eq!(result, Err(Condition::Timeout));

        protocol.connection_lost(Some(ProtocolError::new("eof in header")));
        let p = protocol.clone();
        let result = hub.block_on(async move { p.read(16, None).await });
        assert_eq!(result, Err(Condition::Protocol(ProtocolError::new("eof in header"))));
    }

    #[test]
    fn test_read_timeout_spans_lost_wakeups() {
        let hub = hub();
        let protocol = StreamProtocol::new();
        protocol.connection_made(Rc::new(MockTransport::new()));

        // Woken first, takes the only chunk
        let greedy = protocol.clone();
        hub.spawn(async move {
            let _ = greedy.read(1024, None).await;
        });

        let outcome = Rc::new(RefCell::new(None));
        {
            let (p, outcome) = (protocol.clone(), Rc::clone(&outcome));
            hub.spawn(async move {
                let start = Instant::now();
                let result = p.read(1024, Some(Duration::from_millis(200))).await;
                *outcome.borrow_mut() = Some((result, start.elapsed()));
            });
        }
        let p = protocol.clone();
        hub.call_later(Duration::from_millis(150), move || p.data_received(b"x"));
        hub.run();

        let (result, elapsed) = outcome.borrow_mut().take().unwrap();
        assert_eq!(result, Err(Condition::Timeout));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(320), "waited {elapsed:?}");
    }
}
