//! Error types for the cothread scheduler

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
///
/// Switchpoints only ever produce `Cancelled`, `Timeout` or `QueueEmpty`;
/// the remaining variants report misuse of the hub itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// The calling task was cancelled while at a switchpoint
    #[error("operation cancelled")]
    Cancelled,

    /// A wait exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// Non-blocking get on an empty queue
    #[error("queue empty")]
    QueueEmpty,

    /// No hub exists on this thread
    #[error("hub not initialized")]
    NotInitialized,

    /// A hub already exists on this thread
    #[error("hub already initialized")]
    AlreadyInitialized,

    /// The hub loop is already running on this thread
    #[error("hub is already running")]
    HubRunning,

    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SchedError {
    /// Check if this is the cancellation signal
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SchedError::Cancelled)
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SchedError::Cancelled.to_string(), "operation cancelled");
        assert_eq!(SchedError::Timeout.to_string(), "operation timed out");
        assert_eq!(
            SchedError::InvalidConfig("ready_batch must be at least 1".into()).to_string(),
            "invalid configuration: ready_batch must be at least 1"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(SchedError::Cancelled.is_cancelled());
        assert!(!SchedError::Timeout.is_cancelled());
        assert!(SchedError::Timeout.is_timeout());
    }
}
