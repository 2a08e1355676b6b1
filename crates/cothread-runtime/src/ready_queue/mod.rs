//! Ready queue for the hub
//!
//! The only structure in the hub that other threads may touch. Wakers push
//! task ids here (a `Waker` must be `Send + Sync`, and may be fired from a
//! foreign thread) and `RemoteHandle` pushes boxed callbacks. Every push
//! deposits a wake token with the hub's parker.
//!
//! # Fairness
//!
//! The hub drains at most the number of ids present when a pass starts, so
//! a task that re-schedules itself during the pass lands behind everyone
//! already waiting.

use crate::parking::{new_parking, HubParking};
use cothread_core::TaskId;
use crossbeam_queue::SegQueue;
use std::time::Duration;

/// A callback injected from another thread
pub(crate) type RemoteCallback = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct ReadyQueue {
    tasks: SegQueue<TaskId>,
    callbacks: SegQueue<RemoteCallback>,
    parking: Box<dyn HubParking>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self {
            tasks: SegQueue::new(),
            callbacks: SegQueue::new(),
            parking: new_parking(),
        }
    }

    /// Make a task ready to run
    pub(crate) fn push(&self, id: TaskId) {
        self.tasks.push(id);
        self.parking.unpark();
    }

    pub(crate) fn pop(&self) -> Option<TaskId> {
        self.tasks.pop()
    }

    pub(crate) fn push_callback(&self, callback: RemoteCallback) {
        self.callbacks.push(callback);
        self.parking.unpark();
    }

    pub(crate) fn pop_callback(&self) -> Option<RemoteCallback> {
        self.callbacks.pop()
    }

    /// Approximate ready count (ids may be stale once popped)
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn has_work(&self) -> bool {
        !self.tasks.is_empty() || !self.callbacks.is_empty()
    }

    /// Park the hub thread until something is pushed or `timeout` elapses
    pub(crate) fn park(&self, timeout: Option<Duration>) -> bool {
        self.parking.park(timeout)
    }
}
