//! Tasks: the hub's unit of cooperative execution
//!
//! A task is a boxed future owned by the hub. The hub resumes it whenever
//! its waker fires and it only gives up control at switchpoints. User code
//! holds a [`Task`] handle, which refers to the control block weakly: the
//! handle neither keeps the task alive nor prevents the hub from dropping
//! it once it terminates.

use crate::ready_queue::ReadyQueue;
use crate::sync::Gate;
use cothread_core::{SchedResult, TaskId, TaskState};
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};
use std::time::Duration;
use tracing::debug;

/// Waker payload: pushes the task id onto the hub's ready queue
///
/// `scheduled` collapses repeated wakes into one ready-queue entry. The hub
/// clears it right before resuming the task, so a wake that arrives while
/// the task runs queues it again behind everyone already waiting.
pub(crate) struct TaskWaker {
    id: TaskId,
    scheduled: AtomicBool,
    queue: Arc<ReadyQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.queue.push(self.id);
        }
    }
}

/// Control block of one task
pub(crate) struct TaskCell {
    id: TaskId,
    name: Rc<str>,
    state: Cell<TaskState>,
    cancel_pending: Cell<bool>,
    /// Taken out while the task is being polled
    future: RefCell<Option<LocalBoxFuture<'static, ()>>>,
    wake_state: Arc<TaskWaker>,
    waker: Waker,
    /// Set once the task terminates
    done: Gate,
}

impl TaskCell {
    pub(crate) fn new(
        id: TaskId,
        name: Rc<str>,
        future: LocalBoxFuture<'static, ()>,
        queue: Arc<ReadyQueue>,
    ) -> Self {
        let wake_state = Arc::new(TaskWaker {
            id,
            scheduled: AtomicBool::new(false),
            queue,
        });
        let waker = Waker::from(Arc::clone(&wake_state));
        Self {
            id,
            name,
            state: Cell::new(TaskState::Ready),
            cancel_pending: Cell::new(false),
            future: RefCell::new(Some(future)),
            wake_state,
            waker,
            done: Gate::new(),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    #[inline]
    pub(crate) fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Put the task on the ready queue (deduplicated)
    pub(crate) fn schedule(&self) {
        self.waker.wake_by_ref();
    }

    pub(crate) fn take_future(&self) -> Option<LocalBoxFuture<'static, ()>> {
        self.future.borrow_mut().take()
    }

    pub(crate) fn restore_future(&self, future: LocalBoxFuture<'static, ()>) {
        *self.future.borrow_mut() = Some(future);
    }

    /// Called by the hub right before polling
    pub(crate) fn begin_run(&self) {
        self.wake_state.scheduled.store(false, Ordering::Release);
        if !self.cancel_pending.get() {
            self.state.set(TaskState::Running);
        }
    }

    /// Called by the hub after a poll returned `Pending`
    pub(crate) fn end_run(&self) {
        let state = if self.cancel_pending.get() {
            TaskState::Canceling
        } else if self.wake_state.scheduled.load(Ordering::Acquire) {
            TaskState::Ready
        } else {
            TaskState::Suspended
        };
        self.state.set(state);
    }

    pub(crate) fn terminate(&self) {
        self.state.set(TaskState::Terminated);
        self.cancel_pending.set(false);
        self.done.set();
    }

    /// Request cancellation; returns false if the task already terminated
    pub(crate) fn request_cancel(&self) -> bool {
        if self.state.get().is_terminated() {
            return false;
        }
        if !self.cancel_pending.replace(true) {
            debug!(task = %self.id, name = %self.name, "cancellation requested");
        }
        self.state.set(TaskState::Canceling);
        self.schedule();
        true
    }

    /// Consume a pending cancellation (delivered exactly once)
    pub(crate) fn take_cancel(&self) -> bool {
        if self.cancel_pending.replace(false) {
            self.state.set(TaskState::Running);
            true
        } else {
            false
        }
    }
}

/// Handle to a spawned task
///
/// Cheap to clone. All methods stay valid after the task terminated and
/// the hub released it.
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    name: Rc<str>,
    cell: Weak<TaskCell>,
}

impl Task {
    pub(crate) fn from_cell(cell: &Rc<TaskCell>) -> Self {
        Self {
            id: cell.id,
            name: Rc::clone(&cell.name),
            cell: Rc::downgrade(cell),
        }
    }

    /// Id (and spawn sequence number) of the task
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.cell
            .upgrade()
            .map_or(TaskState::Terminated, |cell| cell.state())
    }

    pub fn is_alive(&self) -> bool {
        !self.state().is_terminated()
    }

    /// Request cooperative cancellation
    ///
    /// The task observes `Err(Cancelled)` at its next switchpoint, in place
    /// of that switchpoint's normal result. Cancellation is delivered once;
    /// cleanup code may block again afterwards. Returns false if the task
    /// had already terminated.
    pub fn cancel(&self) -> bool {
        self.cell.upgrade().is_some_and(|cell| cell.request_cancel())
    }

    /// Wait until the task terminates
    ///
    /// Switchpoint. A task joining itself waits until `timeout`.
    pub async fn join(&self, timeout: Option<Duration>) -> SchedResult<()> {
        let done = match self.cell.upgrade() {
            Some(cell) => cell.done.clone(),
            None => return Ok(()),
        };
        done.wait(timeout).await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Task {}
