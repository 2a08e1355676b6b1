//! Error types for protocols

use cothread_core::SchedError;
use std::io;

/// Result of a blocking protocol operation
pub type ProtocolResult<T> = Result<T, Condition>;

/// Protocol-level failure
///
/// Cheap to clone: the first error seen on a connection is stored and
/// handed back to every later blocking call on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Write attempted on a connection that is closing or closed
    #[error("protocol is closing/closed")]
    Closing,

    /// Write attempted before the transport connected
    #[error("protocol is not connected")]
    NotConnected,

    /// The message handler panicked or failed with a non-protocol condition
    #[error("uncaught exception in dispatcher")]
    DispatcherFault,

    /// The transport reported an I/O failure
    #[error("transport error: {message}")]
    Transport { kind: io::ErrorKind, message: String },

    /// Application-level error, usually raised by a message handler
    #[error("{0}")]
    Message(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Application-level error with `message`
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        Self::Transport {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Outcome of a blocking protocol call that did not succeed
///
/// Cancellation and timeouts travel in the same channel as protocol errors
/// so that a handler cannot swallow one by matching on the other.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Condition {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    /// Non-blocking get found nothing
    #[error("no message available")]
    Empty,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl Condition {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Condition::Cancelled)
    }

    /// The protocol error, if this is one
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Condition::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchedError> for Condition {
    fn from(e: SchedError) -> Self {
        match e {
            SchedError::Cancelled => Condition::Cancelled,
            SchedError::Timeout => Condition::Timeout,
            SchedError::QueueEmpty => Condition::Empty,
            other => Condition::Protocol(ProtocolError::Internal(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sched_error_mapping() {
        assert_eq!(Condition::from(SchedError::Cancelled), Condition::Cancelled);
        assert_eq!(Condition::from(SchedError::Timeout), Condition::Timeout);
        assert_eq!(Condition::from(SchedError::QueueEmpty), Condition::Empty);
        assert_eq!(
            Condition::from(SchedError::NotInitialized),
            Condition::Protocol(ProtocolError::Internal("hub not initialized".into()))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolError::Closing.to_string(), "protocol is closing/closed");
        assert_eq!(ProtocolError::new("bad").to_string(), "bad");
        assert_eq!(Condition::from(ProtocolError::new("bad")).to_string(), "bad");

        let io = io::Error::new(io::ErrorKind::BrokenPipe, "peer gone");
        let e = ProtocolError::from(io);
        assert!(matches!(e, ProtocolError::Transport { kind: io::ErrorKind::BrokenPipe, .. }));
        assert_eq!(e.to_string(), "transport error: peer gone");
    }
}
