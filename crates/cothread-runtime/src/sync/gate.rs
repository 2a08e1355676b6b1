//! One-shot boolean signal

use super::waiter::Waiter;
use crate::switchpoint;
use crate::timer::Deadline;
use cothread_core::{SchedError, SchedResult};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// A boolean flag that tasks can wait on
///
/// `set()` releases every task currently waiting; `clear()` re-arms the gate
/// for future waiters without affecting tasks already released. Cloning a
/// `Gate` yields another handle to the same flag.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Rc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    signaled: Cell<bool>,
    waiters: RefCell<Vec<Rc<Waiter>>>,
}

impl Gate {
    /// Create a cleared gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gate that starts out set
    pub fn new_set() -> Self {
        let gate = Self::new();
        gate.inner.signaled.set(true);
        gate
    }

    /// Set the flag and wake all current waiters
    pub fn set(&self) {
        self.inner.signaled.set(true);
        let waiters = std::mem::take(&mut *self.inner.waiters.borrow_mut());
        for waiter in waiters {
            waiter.notify();
        }
    }

    /// Clear the flag
    pub fn clear(&self) {
        self.inner.signaled.set(false);
    }

    /// Read the flag without suspending
    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.signaled.get()
    }

    /// Number of tasks currently suspended on this gate
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Wait until the flag is set
    ///
    /// Switchpoint. Completes at once if the flag is already set, otherwise
    /// suspends the calling task until `set()`, until `timeout` elapses
    /// (`Err(Timeout)`) or until the task is cancelled (`Err(Cancelled)`).
    ///
    /// # Panics
    ///
    /// Panics if polled outside a task.
    pub fn wait(&self, timeout: Option<Duration>) -> GateWait {
        GateWait {
            gate: self.clone(),
            waiter: None,
            deadline: Deadline::new(timeout),
        }
    }

    fn remove_waiter(&self, waiter: &Rc<Waiter>) {
        self.inner.waiters.borrow_mut().retain(|w| !Rc::ptr_eq(w, waiter));
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("signaled", &self.is_set())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

/// Future returned by [`Gate::wait`]
#[must_use = "switchpoints do nothing unless awaited"]
pub struct GateWait {
    gate: Gate,
    waiter: Option<Rc<Waiter>>,
    deadline: Deadline,
}

impl GateWait {
    fn unregister(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if !waiter.is_notified() {
                self.gate.remove_waiter(&waiter);
            }
        }
        self.deadline.disarm();
    }
}

impl Future for GateWait {
    type Output = SchedResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Err(e) = switchpoint::check("Gate::wait") {
            this.unregister();
            return Poll::Ready(Err(e));
        }

        let released = this.waiter.as_ref().is_some_and(|w| w.is_notified());
        if released || this.gate.is_set() {
            this.unregister();
            return Poll::Ready(Ok(()));
        }

        if this.deadline.poll_elapsed(cx) {
            this.unregister();
            return Poll::Ready(Err(SchedError::Timeout));
        }

        match &this.waiter {
            Some(waiter) => waiter.register(cx.waker()),
            None => {
                let waiter = Waiter::new(cx.waker());
                this.gate.inner.waiters.borrow_mut().push(Rc::clone(&waiter));
                this.waiter = Some(waiter);
            }
        }
        Poll::Pending
    }
}

impl Drop for GateWait {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sleep, Hub, HubConfig};
    use std::cell::RefCell;

    fn hub() -> Hub {
        Hub::new(HubConfig::new()).unwrap()
    }

    #[test]
    fn test_set_before_wait_returns_immediately() {
        let hub = hub();
        let gate = Gate::new_set();
        let result = hub.block_on(async move { gate.wait(None).await });
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_set_wakes_all_waiters() {
        let hub = hub();
        let gate = Gate::new();
        let woken = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let gate = gate.clone();
            let woken = Rc::clone(&woken);
            hub.spawn(async move {
                gate.wait(None).await.unwrap();
                woken.set(woken.get() + 1);
            });
        }

        hub.run_until_idle();
        assert_eq!(gate.waiter_count(), 3);
        assert_eq!(woken.get(), 0);

        gate.set();
        hub.run_until_idle();
        assert_eq!(woken.get(), 3);
        assert_eq!(gate.waiter_count(), 0);
    }

    #[test]
    fn test_clear_after_set_keeps_released_waiters_released() {
        let hub = hub();
        let gate = Gate::new();
        let done = Rc::new(Cell::new(false));

        let waiter = {
            let gate = gate.clone();
            let done = Rc::clone(&done);
            hub.spawn(async move {
                gate.wait(None).await.unwrap();
                done.set(true);
            })
        };

        hub.run_until_idle();
        gate.set();
        gate.clear();
        hub.run_until_idle();

        assert!(done.get());
        assert!(waiter.state().is_terminated());
        assert!(!gate.is_set());
    }

    #[test]
    fn test_wait_timeout() {
        let hub = hub();
        let gate = Gate::new();
        let probe = gate.clone();
        let result = hub.block_on(async move { gate.wait(Some(Duration::from_millis(20))).await });
        assert_eq!(result, Err(SchedError::Timeout));
        assert_eq!(probe.waiter_count(), 0);
    }

    #[test]
    fn test_wait_cancelled() {
        let hub = hub();
        let gate = Gate::new();
        let outcome = Rc::new(RefCell::new(None));

        let task = {
            let gate = gate.clone();
            let outcome = Rc::clone(&outcome);
            hub.spawn(async move {
                let result = gate.wait(None).await;
                *outcome.borrow_mut() = Some(result);
            })
        };

        hub.run_until_idle();
        assert!(task.cancel());
        hub.run_until_idle();

        assert_eq!(*outcome.borrow(), Some(Err(SchedError::Cancelled)));
        assert_eq!(gate.waiter_count(), 0);
        assert!(task.state().is_terminated());
    }

    #[test]
    fn test_set_wins_over_later_timeout() {
        let hub = hub();
        let gate = Gate::new();
        let setter = gate.clone();

        let result = hub.block_on(async move {
            crate::spawn(async move {
                sleep(Duration::from_millis(5)).await.unwrap();
                setter.set();
            });
            gate.wait(Some(Duration::from_secs(5))).await
        });
        assert_eq!(result, Ok(()));
        assert_eq!(hub.pending_timers(), 0);
    }

    #[test]
    #[should_panic(expected = "Gate::wait")]
    fn test_wait_outside_task_panics() {
        let gate = Gate::new();
        let _ = futures::executor::block_on(gate.wait(None));
    }
}
