//! Task lifecycle state

use core::fmt;

/// State of a task
///
/// ```text
///   spawn ──► Ready ──► Running ──► Suspended ──wake──► Ready
///                          │  ▲
///               cancel()   │  └──── cancellation delivered
///                          ▼
///                      Canceling ──► ... ──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// In the hub's ready queue
    Ready = 0,

    /// Currently executing; at most one task per hub is in this state
    Running = 1,

    /// Parked at a switchpoint, waiting to be woken
    Suspended = 2,

    /// Cancellation requested but not yet observed at a switchpoint
    Canceling = 3,

    /// Body returned; the task will never run again
    Terminated = 4,
}

impl TaskState {
    /// Check if this state allows the task to be resumed by the hub
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Canceling)
    }

    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, TaskState::Terminated)
    }
}

impl From<u8> for TaskState {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Suspended,
            3 => TaskState::Canceling,
            _ => TaskState::Terminated,
        }
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> u8 {
        state as u8
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Suspended => "suspended",
            TaskState::Canceling => "canceling",
            TaskState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(TaskState::Ready.is_runnable());
        assert!(TaskState::Canceling.is_runnable());
        assert!(!TaskState::Suspended.is_runnable());
        assert!(!TaskState::Running.is_runnable());

        assert!(TaskState::Terminated.is_terminated());
        assert!(!TaskState::Canceling.is_terminated());
    }

    #[test]
    fn test_state_u8_roundtrip() {
        for state in [
            TaskState::Ready,
            TaskState::Running,
            TaskState::Suspended,
            TaskState::Canceling,
            TaskState::Terminated,
        ] {
            assert_eq!(TaskState::from(u8::from(state)), state);
        }
        assert_eq!(TaskState::from(200), TaskState::Terminated);
    }
}
