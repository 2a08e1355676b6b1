//! Wait-list entry shared by the synchronization primitives

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::Waker;

/// One suspended task in a gate's or queue's wait list
///
/// `notified` is latched by the notifier before waking, so the waiter
/// knows it was released even if the primitive changed state again
/// before it got to run.
#[derive(Debug)]
pub(crate) struct Waiter {
    notified: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl Waiter {
    pub(crate) fn new(waker: &Waker) -> Rc<Self> {
        Rc::new(Self {
            notified: Cell::new(false),
            waker: RefCell::new(Some(waker.clone())),
        })
    }

    /// Refresh the stored waker if the task is now polled with another one
    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();
        if !slot.as_ref().is_some_and(|w| w.will_wake(waker)) {
            *slot = Some(waker.clone());
        }
    }

    pub(crate) fn notify(&self) {
        self.notified.set(true);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    #[inline]
    pub(crate) fn is_notified(&self) -> bool {
        self.notified.get()
    }
}
