//! Thread-local storage for hub context
//!
//! Each OS thread has at most one live hub and, while the hub is resuming
//! one, a current task. Switchpoints look both up here instead of through
//! a process-wide global.

use crate::hub::HubShared;
use crate::task::TaskCell;
use cothread_core::{SchedError, SchedResult, TaskId};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

thread_local! {
    /// The hub owned by this thread (weak: the `Hub` value owns it)
    static CURRENT_HUB: RefCell<Weak<HubShared>> = RefCell::new(Weak::new());

    /// Task being resumed right now, if any
    static CURRENT_TASK: RefCell<Option<Rc<TaskCell>>> = const { RefCell::new(None) };
}

/// Register `hub` as this thread's hub
pub(crate) fn install_hub(hub: &Rc<HubShared>) -> SchedResult<()> {
    CURRENT_HUB.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.strong_count() > 0 {
            return Err(SchedError::AlreadyInitialized);
        }
        *slot = Rc::downgrade(hub);
        Ok(())
    })
}

/// Forget this thread's hub, if it is `hub`
pub(crate) fn uninstall_hub(hub: &Rc<HubShared>) {
    CURRENT_HUB.with(|cell| {
        let mut slot = cell.borrow_mut();
        if std::ptr::eq(slot.as_ptr(), Rc::as_ptr(hub)) {
            *slot = Weak::new();
        }
    });
}

/// Get this thread's hub
#[inline]
pub(crate) fn current_hub() -> Option<Rc<HubShared>> {
    CURRENT_HUB.with(|cell| cell.borrow().upgrade())
}

/// Run `f` against this thread's hub, if there is one
///
/// The thread-local is not borrowed while `f` runs, so `f` may re-enter.
#[inline]
pub(crate) fn with_hub<R>(f: impl FnOnce(&Rc<HubShared>) -> R) -> Option<R> {
    current_hub().map(|hub| f(&hub))
}

/// Marks a task as current for as long as the guard lives
pub(crate) struct TaskGuard {
    previous: Option<Rc<TaskCell>>,
}

/// Make `task` the current task until the returned guard is dropped
pub(crate) fn enter_task(task: Rc<TaskCell>) -> TaskGuard {
    let previous = CURRENT_TASK.with(|cell| cell.borrow_mut().replace(task));
    TaskGuard { previous }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TASK.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// Get the task currently being resumed
#[inline]
pub(crate) fn current_task() -> Option<Rc<TaskCell>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

/// Id of the current task, or `TaskId::NONE` outside a task
#[inline]
pub fn current_task_id() -> TaskId {
    CURRENT_TASK.with(|cell| cell.borrow().as_ref().map_or(TaskId::NONE, |task| task.id()))
}

/// Check if we're running inside a task
#[inline]
pub fn is_in_task() -> bool {
    CURRENT_TASK.with(|cell| cell.borrow().is_some())
}

/// Check if this thread has a live hub
#[inline]
pub fn has_hub() -> bool {
    CURRENT_HUB.with(|cell| cell.borrow().strong_count() > 0)
}
