//! Unbounded FIFO queue with blocking dequeue

use super::waiter::Waiter;
use crate::switchpoint;
use crate::timer::Deadline;
use cothread_core::{SchedError, SchedResult};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// FIFO queue whose consumers suspend until an item arrives
///
/// `put` never blocks. Items leave in exactly the order they were put, and
/// each item is handed to one consumer only. Cloning yields another handle
/// to the same queue.
pub struct BlockingQueue<T> {
    inner: Rc<QueueInner<T>>,
}

struct QueueInner<T> {
    items: RefCell<VecDeque<T>>,
    waiters: RefCell<VecDeque<Rc<Waiter>>>,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(QueueInner {
                items: RefCell::new(VecDeque::new()),
                waiters: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Append `item` to the tail and wake the longest-waiting consumer
    pub fn put(&self, item: T) {
        self.inner.items.borrow_mut().push_back(item);
        self.notify_one();
    }

    /// Pop the head without suspending
    pub fn try_get(&self) -> Option<T> {
        self.inner.items.borrow_mut().pop_front()
    }

    /// Get the head item
    ///
    /// Switchpoint. With `block == false` this never suspends and fails
    /// with `QueueEmpty` when there is nothing to take; otherwise it behaves
    /// like [`get`](Self::get).
    pub async fn get_with(&self, block: bool, timeout: Option<Duration>) -> SchedResult<T> {
        if block {
            return self.get(timeout).await;
        }
        switchpoint::check("BlockingQueue::get")?;
        self.try_get().ok_or(SchedError::QueueEmpty)
    }

    /// Wait for the head item
    ///
    /// Switchpoint. Returns the head at once if the queue is non-empty;
    /// otherwise suspends until an item is put, until `timeout` elapses
    /// (`Err(Timeout)`) or until the task is cancelled (`Err(Cancelled)`).
    /// A cancelled or timed-out get never consumes an item.
    ///
    /// # Panics
    ///
    /// Panics if polled outside a task.
    pub fn get(&self, timeout: Option<Duration>) -> QueueGet<T> {
        QueueGet {
            queue: self.clone(),
            waiter: None,
            deadline: Deadline::new(timeout),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Number of consumers currently suspended in `get`
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Drop every queued item
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.inner.items.borrow_mut());
        drop(drained);
    }

    fn notify_one(&self) {
        let waiter = self.inner.waiters.borrow_mut().pop_front();
        if let Some(waiter) = waiter {
            waiter.notify();
        }
    }

    fn remove_waiter(&self, waiter: &Rc<Waiter>) {
        self.inner.waiters.borrow_mut().retain(|w| !Rc::ptr_eq(w, waiter));
    }
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingQueue")
            .field("len", &self.len())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

/// Future returned by [`BlockingQueue::get`]
#[must_use = "switchpoints do nothing unless awaited"]
pub struct QueueGet<T> {
    queue: BlockingQueue<T>,
    waiter: Option<Rc<Waiter>>,
    deadline: Deadline,
}

impl<T> QueueGet<T> {
    /// Leave the wait list. A wakeup that was consumed without taking an
    /// item is passed on to the next consumer.
    fn unregister(&mut self, took_item: bool) {
        if let Some(waiter) = self.waiter.take() {
            if !waiter.is_notified() {
                self.queue.remove_waiter(&waiter);
            } else if !took_item && !self.queue.is_empty() {
                self.queue.notify_one();
            }
        }
        self.deadline.disarm();
    }
}

impl<T> Future for QueueGet<T> {
    type Output = SchedResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Err(e) = switchpoint::check("BlockingQueue::get") {
            this.unregister(false);
            return Poll::Ready(Err(e));
        }

        if let Some(item) = this.queue.try_get() {
            this.unregister(true);
            return Poll::Ready(Ok(item));
        }

        if this.deadline.poll_elapsed(cx) {
            this.unregister(false);
            return Poll::Ready(Err(SchedError::Timeout));
        }

        match &this.waiter {
            Some(waiter) if !waiter.is_notified() => waiter.register(cx.waker()),
            _ => {
                // First poll, or woken but another consumer took the item
                let waiter = Waiter::new(cx.waker());
                this.queue.inner.waiters.borrow_mut().push_back(Rc::clone(&waiter));
                this.waiter = Some(waiter);
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for QueueGet<T> {
    fn drop(&mut self) {
        self.unregister(false);
    }
}
