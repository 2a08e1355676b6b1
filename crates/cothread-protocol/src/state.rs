//! Connection lifecycle and flow control
//!
//! [`ConnectionState`] is the part every protocol variant shares:
//!
//! ```text
//!   open ──close()──► closing ──connection_lost()──► closed
//!     └───────────────connection_lost()───────────────┘
//! ```
//!
//! Writes are gated by `may_write`, which the transport toggles through
//! `pause_writing`/`resume_writing`. Reads are throttled with hysteresis:
//! reading pauses once the undelivered input reaches the high watermark
//! and resumes only after it drains to the low one.

use crate::error::{Condition, ProtocolError, ProtocolResult};
use crate::transport::TransportRef;
use cothread_core::env::env_get;
use cothread_runtime::Gate;
use std::cell::{Cell, RefCell};
use std::fmt;
use tracing::{debug, trace};

/// Read watermarks of one protocol instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBufferLimits {
    pub high: usize,
    pub low: usize,
}

impl ReadBufferLimits {
    pub const DEFAULT_HIGH: usize = 65536;

    /// Limits with `low` defaulting to half of `high`, clamped to `high`
    pub fn new(high: usize, low: Option<usize>) -> Self {
        let low = low.unwrap_or(high / 2).min(high);
        Self { high, low }
    }

    /// Defaults with `COT_READ_BUFFER_HIGH` override
    pub fn from_env() -> Self {
        Self::new(env_get("COT_READ_BUFFER_HIGH", Self::DEFAULT_HIGH), None)
    }
}

impl Default for ReadBufferLimits {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HIGH, None)
    }
}

/// Lifecycle and flow-control state of one connection
///
/// Mutated only from transport callbacks and from tasks on the same hub,
/// so plain cells suffice. The transport is always cloned out of its slot
/// before it is called, which lets it call back into this state.
pub struct ConnectionState {
    transport: RefCell<Option<TransportRef>>,
    error: RefCell<Option<ProtocolError>>,
    may_write: Gate,
    closing: Cell<bool>,
    closed: Gate,
    read_buffer_size: Cell<usize>,
    limits: Cell<ReadBufferLimits>,
    reading: Cell<bool>,
}

impl ConnectionState {
    pub fn new(limits: ReadBufferLimits) -> Self {
        Self {
            transport: RefCell::new(None),
            error: RefCell::new(None),
            may_write: Gate::new_set(),
            closing: Cell::new(false),
            closed: Gate::new(),
            read_buffer_size: Cell::new(0),
            limits: Cell::new(ReadBufferLimits::new(limits.high, Some(limits.low))),
            reading: Cell::new(false),
        }
    }

    /// The connected transport, if any
    pub fn transport(&self) -> Option<TransportRef> {
        self.transport.borrow().clone()
    }

    /// The sticky error, if one was stored
    pub fn error(&self) -> Option<ProtocolError> {
        self.error.borrow().clone()
    }

    /// Store `error` unless an earlier one is already stored
    ///
    /// Returns whether `error` was stored.
    pub fn set_error_once(&self, error: ProtocolError) -> bool {
        let mut slot = self.error.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        true
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.may_write.is_set()
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }

    #[inline]
    pub fn is_reading(&self) -> bool {
        self.reading.get()
    }

    pub(crate) fn closed_gate(&self) -> &Gate {
        &self.closed
    }

    // Transport callbacks

    pub fn connection_made(&self, transport: TransportRef) {
        *self.transport.borrow_mut() = Some(transport);
        self.reading.set(true);
        debug!("connection made");
    }

    /// Release everybody blocked on this connection
    ///
    /// `may_write` is forced open so blocked writers wake up and fail with
    /// the stored error instead of waiting forever.
    pub fn connection_lost(&self, error: Option<ProtocolError>) {
        match &error {
            Some(e) => debug!(error = %e, "connection lost"),
            None => debug!("connection closed"),
        }
        if let Some(e) = error {
            self.set_error_once(e);
        }
        self.closed.set();
        self.closing.set(false);
        self.may_write.set();
        let released = self.transport.borrow_mut().take();
        drop(released);
    }

    pub fn pause_writing(&self) {
        trace!("pause writing");
        self.may_write.clear();
    }

    pub fn resume_writing(&self) {
        trace!("resume writing");
        self.may_write.set();
    }

    // Read flow control

    /// Bytes (or messages) received but not yet consumed
    #[inline]
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.get()
    }

    pub fn read_buffer_limits(&self) -> ReadBufferLimits {
        self.limits.get()
    }

    /// Replace the watermarks; `low` defaults to half of `high`
    pub fn set_read_buffer_limits(&self, high: usize, low: Option<usize>) {
        self.limits.set(ReadBufferLimits::new(high, low));
    }

    /// Record the new read buffer size and apply the watermarks
    pub fn update_read_buffer_size(&self, size: usize) {
        self.read_buffer_size.set(size);
        self.read_buffer_size_changed();
    }

    /// Pause or resume reading if the buffer size crossed a watermark
    pub fn read_buffer_size_changed(&self) {
        let Some(transport) = self.transport() else {
            return;
        };
        let size = self.read_buffer_size.get();
        let limits = self.limits.get();
        if size >= limits.high && self.reading.get() {
            trace!(size, high = limits.high, "pause reading");
            self.reading.set(false);
            transport.pause_reading();
        } else if size <= limits.low && !self.reading.get() {
            trace!(size, low = limits.low, "resume reading");
            self.reading.set(true);
            transport.resume_reading();
        }
    }

    // Blocking operations

    /// Wait until writing is permitted and return the transport
    ///
    /// Switchpoint. Fails with the sticky error, or with `Closing` once the
    /// connection is closing or closed.
    pub async fn writable_transport(&self) -> ProtocolResult<TransportRef> {
        self.may_write.wait(None).await?;
        if let Some(e) = self.error() {
            return Err(e.into());
        }
        if self.is_closing() || self.is_closed() {
            return Err(ProtocolError::Closing.into());
        }
        self.transport()
            .ok_or(Condition::Protocol(ProtocolError::NotConnected))
    }

    /// Switchpoint. Write `data` once writing is permitted.
    pub async fn write(&self, data: &[u8]) -> ProtocolResult<()> {
        let transport = self.writable_transport().await?;
        transport.write(data)?;
        Ok(())
    }

    /// Switchpoint. Write every buffer of `lines`, in order.
    pub async fn writelines(&self, lines: &[Vec<u8>]) -> ProtocolResult<()> {
        let transport = self.writable_transport().await?;
        transport.writelines(lines)?;
        Ok(())
    }

    /// Switchpoint. Shut down the write direction.
    pub async fn write_eof(&self) -> ProtocolResult<()> {
        let transport = self.writable_transport().await?;
        transport.write_eof()?;
        Ok(())
    }

    /// Close the connection and wait until the transport reports it lost
    ///
    /// Switchpoint. Returns at once if the connection is already closing or
    /// closed, without touching the transport again.
    pub async fn close(&self) -> ProtocolResult<()> {
        if self.is_closing() || self.is_closed() {
            return Ok(());
        }
        self.closing.set(true);
        match self.transport() {
            Some(transport) => transport.close(),
            // Never connected: nothing will report the loss
            None => self.connection_lost(None),
        }
        self.closed.wait(None).await?;
        Ok(())
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(ReadBufferLimits::default())
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("connected", &self.transport.borrow().is_some())
            .field("error", &*self.error.borrow())
            .field("may_write", &self.is_writable())
            .field("closing", &self.is_closing())
            .field("closed", &self.is_closed())
            .field("read_buffer_size", &self.read_buffer_size())
            .field("limits", &self.limits.get())
            .field("reading", &self.is_reading())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use cothread_runtime::{Hub, HubConfig};
    use std::rc::Rc;

    fn hub() -> Hub {
        Hub::new(HubConfig::new()).unwrap()
    }

    #[test]
    fn test_fresh_state_is_open_and_writable() {
        let state = ConnectionState::default();
        assert!(state.is_writable());
        assert!(!state.is_closing());
        assert!(!state.is_closed());
        assert_eq!(state.error(), None);
        assert_eq!(state.read_buffer_limits(), ReadBufferLimits::new(65536, Some(32768)));

        state.connection_made(Rc::new(MockTransport::new()));
        assert!(state.is_reading());
        assert!(state.transport().is_some());
    }

    #[test]
    fn test_limits_clamp_low_to_high() {
        let state = ConnectionState::default();
        state.set_read_buffer_limits(10, Some(20));
        assert_eq!(state.read_buffer_limits(), ReadBufferLimits { high: 10, low: 10 });
        state.set_read_buffer_limits(10, None);
        assert_eq!(state.read_buffer_limits(), ReadBufferLimits { high: 10, low: 5 });
    }

    #[test]
    fn test_limits_from_env() {
        std::env::set_var("COT_READ_BUFFER_HIGH", "1000");
        assert_eq!(ReadBufferLimits::from_env(), ReadBufferLimits { high: 1000, low: 500 });
        std::env::remove_var("COT_READ_BUFFER_HIGH");
    }

    #[test]
    fn test_read_hysteresis() {
        let mut transport = MockTransport::new();
        transport.expect_pause_reading().times(1).return_const(());
        transport.expect_resume_reading().times(1).return_const(());

        let state = ConnectionState::new(ReadBufferLimits::new(100, Some(50)));
        state.connection_made(Rc::new(transport));

        state.update_read_buffer_size(100);
        assert!(!state.is_reading());
        state.update_read_buffer_size(60);
        assert!(!state.is_reading());
        state.update_read_buffer_size(50);
        assert!(state.is_reading());

        for size in [51, 99, 75, 51, 98] {
            state.update_read_buffer_size(size);
        }
        assert!(state.is_reading());
    }

    #[test]
    fn test_size_change_without_transport_is_ignored() {
        let state = ConnectionState::new(ReadBufferLimits::new(1, None));
        state.update_read_buffer_size(10);
        assert!(!state.is_reading());
        assert_eq!(state.read_buffer_size(), 10);
    }

    #[test]
    fn test_first_error_wins() {
        let state = ConnectionState::default();
        assert!(state.set_error_once(ProtocolError::new("first")));
        assert!(!state.set_error_once(ProtocolError::new("second")));
        state.connection_lost(Some(ProtocolError::new("third")));
        assert_eq!(state.error(), Some(ProtocolError::new("first")));
    }

    #[test]
    fn test_connection_lost_releases_everything() {
        let state = ConnectionState::default();
        state.connection_made(Rc::new(MockTransport::new()));
        state.pause_writing();
        assert!(!state.is_writable());

        state.connection_lost(Some(ProtocolError::new("reset")));
        assert!(state.is_writable());
        assert!(state.is_closed());
        assert!(!state.is_closing());
        assert!(state.transport().is_none());
        assert_eq!(state.error(), Some(ProtocolError::new("reset")));
    }

    #[test]
    fn test_close_is_idempotent() {
        let hub = hub();
        let mut transport = MockTransport::new();
        transport.expect_close().times(1).return_const(());

        let state = Rc::new(ConnectionState::default());
        state.connection_made(Rc::new(transport));

        let closer = {
            let state = Rc::clone(&state);
            hub.spawn(async move { state.close().await.unwrap() })
        };
        hub.run_until_idle();
        assert!(state.is_closing());
        assert!(closer.is_alive());

        // Second close returns at once and does not touch the transport
        let second = Rc::clone(&state);
        assert_eq!(hub.block_on(async move { second.close().await }), Ok(()));

        state.connection_lost(None);
        hub.run_until_idle();
        assert!(!closer.is_alive());
        assert!(state.is_closed());
        assert!(!state.is_closing());
    }

    #[test]
    fn test_close_without_transport() {
        let hub = hub();
        let state = Rc::new(ConnectionState::default());
        let closer = Rc::clone(&state);
        assert_eq!(hub.block_on(async move { closer.close().await }), Ok(()));
        assert!(state.is_closed());
    }

    #[test]
    fn test_write_before_connect() {
        let hub = hub();
        let state = Rc::new(ConnectionState::default());
        let writer = Rc::clone(&state);
        let result = hub.block_on(async move { writer.write(b"early").await });
        assert_eq!(result, Err(Condition::Protocol(ProtocolError::NotConnected)));
    }
}
