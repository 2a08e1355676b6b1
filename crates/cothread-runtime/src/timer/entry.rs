//! Timer entry and handle types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;
use std::time::{Duration, Instant};

/// Globally unique timer handle for cancellation
///
/// Each timer gets a unique handle when created. The handle cancels the
/// timer before it fires; cancelling a fired timer is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Generate a new unique timer handle
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value (for debugging/logging)
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// What happens when a timer fires
pub enum TimerAction {
    /// Wake a task parked at a switchpoint (sleep or wait timeout)
    Wake(Waker),

    /// Run a closure on the hub loop (`Hub::call_later`)
    Callback(Box<dyn FnOnce() + 'static>),
}

impl fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerAction::Wake(_) => f.write_str("Wake"),
            TimerAction::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Timer entry - stored in the timer backend
#[derive(Debug)]
pub struct TimerEntry {
    /// Unique handle for cancellation
    pub handle: TimerHandle,

    /// When this timer should fire
    pub deadline: Instant,

    pub action: TimerAction,
}

impl TimerEntry {
    /// Create a timer with absolute deadline
    #[inline]
    pub fn at(deadline: Instant, action: TimerAction) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline,
            action,
        }
    }

    /// Create a timer that wakes `waker` at `deadline`
    #[inline]
    pub fn wake_at(deadline: Instant, waker: Waker) -> Self {
        Self::at(deadline, TimerAction::Wake(waker))
    }

    /// Create a timer that runs `callback` after `delay`
    #[inline]
    pub fn callback_after<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self::at(Instant::now() + delay, TimerAction::Callback(Box::new(callback)))
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time remaining until deadline (zero if expired)
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Consume the entry, performing its action
    pub fn fire(self) {
        match self.action {
            TimerAction::Wake(waker) => waker.wake(),
            TimerAction::Callback(callback) => callback(),
        }
    }
}
