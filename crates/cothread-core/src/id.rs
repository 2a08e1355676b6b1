//! Task identifier type

use core::fmt;

/// Identifier of a task within its hub
///
/// Ids are handed out by the hub in spawn order, so the id doubles as the
/// task's sequence number. The value `u64::MAX` is reserved as the "no task"
/// sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Sentinel value indicating no task
    pub const NONE: TaskId = TaskId(u64::MAX);

    #[inline]
    pub const fn new(id: u64) -> Self {
        TaskId(id)
    }

    /// Sequence number of the task (spawn order within its hub)
    #[inline]
    pub const fn sequence(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Convert to Option, mapping the sentinel to `None`
    #[inline]
    pub const fn to_option(self) -> Option<TaskId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u64> for TaskId {
    #[inline]
    fn from(id: u64) -> Self {
        TaskId(id)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "TaskId(NONE)")
        } else {
            write!(f, "TaskId({})", self.0)
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_sequence() {
        let id = TaskId::new(7);
        assert_eq!(id.sequence(), 7);
        assert!(!id.is_none());
        assert_eq!(id.to_option(), Some(id));
    }

    #[test]
    fn test_task_id_none() {
        assert!(TaskId::NONE.is_none());
        assert_eq!(TaskId::default(), TaskId::NONE);
        assert_eq!(TaskId::NONE.to_option(), None);
        assert_eq!(format!("{}", TaskId::NONE), "none");
        assert_eq!(format!("{:?}", TaskId::new(3)), "TaskId(3)");
    }
}
