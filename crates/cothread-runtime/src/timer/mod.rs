//! Timer subsystem for the hub
//!
//! Every hub owns one timer backend. Timers either wake a task parked at a
//! switchpoint (sleep, wait/get timeouts) or run a callback on the loop
//! (`Hub::call_later`).
//!
//! # Architecture
//!
//! ```text
//!     sleep() / Gate::wait(timeout) / queue.get(timeout)
//!                           │ Deadline
//!                           ▼
//!               ┌───────────────────────┐
//!               │   dyn TimerBackend    │  ◄── Trait abstraction
//!               └───────────────────────┘
//!                           │
//!                           ▼
//!                    HeapTimerBackend
//!                           │
//!     hub loop ──poll_expired()──► Waker::wake / callback()
//! ```

mod entry;
pub mod impls;

pub use entry::{TimerAction, TimerEntry, TimerHandle};
pub use impls::{create_backend, HeapTimerBackend};

use crate::tls;
use std::task::Context;
use std::time::{Duration, Instant};

/// Core timer trait
///
/// Backends are owned by exactly one hub and never shared across threads.
pub trait TimerBackend {
    /// Insert a timer entry, returns handle for cancellation
    fn insert(&mut self, entry: TimerEntry) -> TimerHandle;

    /// Cancel a timer by handle
    ///
    /// Returns true if the timer was pending and is now cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Remove and return every timer due at `now`, in deadline order
    fn poll_expired(&mut self, now: Instant) -> Vec<TimerEntry>;

    /// When is the next timer due? None if no timers are scheduled
    fn next_deadline(&self) -> Option<Instant>;

    /// Number of pending (non-cancelled) timers
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Timeout bookkeeping for one switchpoint future
///
/// The deadline is fixed the first time the future is polled. While the
/// future is pending a single wake-up timer is armed with the hub; it is
/// cancelled as soon as the future completes or is dropped, so a normal
/// wakeup and a timeout can never both be observed.
#[derive(Debug)]
pub(crate) struct Deadline {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    timer: Option<TimerHandle>,
}

impl Deadline {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: None,
            timer: None,
        }
    }

    /// Returns true once the deadline has passed; otherwise makes sure a
    /// timer will wake `cx` when it does.
    pub(crate) fn poll_elapsed(&mut self, cx: &Context<'_>) -> bool {
        let Some(timeout) = self.timeout else {
            return false;
        };

        let now = Instant::now();
        let deadline = *self.deadline.get_or_insert_with(|| now + timeout);
        if now >= deadline {
            self.disarm();
            return true;
        }

        if self.timer.is_none() {
            let entry = TimerEntry::wake_at(deadline, cx.waker().clone());
            self.timer = tls::with_hub(|hub| hub.insert_timer(entry));
        }
        false
    }

    /// Cancel the pending wake-up timer, if any
    pub(crate) fn disarm(&mut self) {
        if let Some(handle) = self.timer.take() {
            tls::with_hub(|hub| hub.cancel_timer(handle));
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.disarm();
    }
}
