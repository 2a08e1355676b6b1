//! The hub: one cooperative scheduler per OS thread
//!
//! The hub owns every task spawned on its thread, a timer heap and a queue
//! of loop callbacks. One pass of the loop:
//!
//! 1. fire expired timers
//! 2. run queued callbacks (local, then those injected by other threads)
//! 3. resume up to `ready_batch` ready tasks, oldest wake first
//!
//! When a pass finds nothing to do the thread parks until the next timer
//! is due or another thread deposits work.

use crate::config::HubConfig;
use crate::ready_queue::{ReadyQueue, RemoteCallback};
use crate::task::{Task, TaskCell};
use crate::timer::{create_backend, TimerBackend, TimerEntry, TimerHandle};
use crate::tls;
use cothread_core::{SchedError, SchedResult, TaskId};
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

type LocalCallback = Box<dyn FnOnce() + 'static>;

/// State shared between the `Hub` owner and the thread-local lookup
pub(crate) struct HubShared {
    config: HubConfig,
    next_id: Cell<u64>,
    tasks: RefCell<HashMap<TaskId, Rc<TaskCell>>>,
    ready: Arc<ReadyQueue>,
    callbacks: RefCell<VecDeque<LocalCallback>>,
    timers: RefCell<Box<dyn TimerBackend>>,
    sequences: RefCell<HashMap<String, u64>>,
    running: Cell<bool>,
}

impl HubShared {
    fn new(config: HubConfig) -> Self {
        Self {
            next_id: Cell::new(1),
            tasks: RefCell::new(HashMap::with_capacity(config.task_capacity)),
            ready: Arc::new(ReadyQueue::new()),
            callbacks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(create_backend(config.timer_capacity)),
            sequences: RefCell::new(HashMap::new()),
            running: Cell::new(false),
            config,
        }
    }

    pub(crate) fn spawn_task(&self, name: Option<String>, future: LocalBoxFuture<'static, ()>) -> Task {
        let id = TaskId::new(self.next_id.get());
        self.next_id.set(id.sequence() + 1);

        let name: Rc<str> = name.unwrap_or_else(|| format!("task-{id}")).into();
        let cell = Rc::new(TaskCell::new(id, name, future, Arc::clone(&self.ready)));
        self.tasks.borrow_mut().insert(id, Rc::clone(&cell));
        cell.schedule();

        debug!(task = %id, name = cell.name(), "task spawned");
        Task::from_cell(&cell)
    }

    pub(crate) fn insert_timer(&self, entry: TimerEntry) -> TimerHandle {
        self.timers.borrow_mut().insert(entry)
    }

    pub(crate) fn cancel_timer(&self, handle: TimerHandle) -> bool {
        self.timers.borrow_mut().cancel(handle)
    }

    fn push_callback(&self, callback: LocalCallback) {
        self.callbacks.borrow_mut().push_back(callback);
    }

    fn next_sequence(&self, key: &str) -> u64 {
        let mut sequences = self.sequences.borrow_mut();
        let next = sequences.entry(key.to_owned()).or_insert(1);
        let seq = *next;
        *next += 1;
        seq
    }

    /// One pass of the loop; returns whether anything happened
    fn run_once(&self) -> bool {
        let fired = self.fire_timers();
        let called = self.run_callbacks();
        let resumed = self.run_ready();
        fired || called || resumed
    }

    fn fire_timers(&self) -> bool {
        let expired = self.timers.borrow_mut().poll_expired(Instant::now());
        let fired = !expired.is_empty();
        for entry in expired {
            entry.fire();
        }
        fired
    }

    fn run_callbacks(&self) -> bool {
        let local: Vec<_> = self.callbacks.borrow_mut().drain(..).collect();
        let mut ran = !local.is_empty();
        for callback in local {
            callback();
        }
        while let Some(callback) = self.ready.pop_callback() {
            ran = true;
            callback();
        }
        ran
    }

    fn run_ready(&self) -> bool {
        let batch = self.ready.len().min(self.config.ready_batch);
        let mut resumed = false;
        for _ in 0..batch {
            let Some(id) = self.ready.pop() else {
                break;
            };
            resumed |= self.poll_task(id);
        }
        resumed
    }

    fn poll_task(&self, id: TaskId) -> bool {
        // Ids of terminated tasks can linger in the queue
        let Some(cell) = self.tasks.borrow().get(&id).cloned() else {
            return false;
        };
        let Some(mut future) = cell.take_future() else {
            return false;
        };

        cell.begin_run();
        trace!(task = %id, "resume");
        let mut cx = Context::from_waker(cell.waker());
        let result = {
            let _current = tls::enter_task(Rc::clone(&cell));
            panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        };

        match result {
            Ok(Poll::Pending) => {
                cell.restore_future(future);
                cell.end_run();
            }
            Ok(Poll::Ready(())) => {
                self.finish(&cell);
                drop(future);
            }
            Err(payload) => {
                error!(task = %id, name = cell.name(), "task panicked");
                self.finish(&cell);
                drop(future);
                panic::resume_unwind(payload);
            }
        }
        true
    }

    fn finish(&self, cell: &Rc<TaskCell>) {
        let removed = self.tasks.borrow_mut().remove(&cell.id());
        drop(removed);
        cell.terminate();
        debug!(task = %cell.id(), name = cell.name(), "task terminated");
    }

    fn has_pending_work(&self) -> bool {
        self.ready.has_work() || !self.callbacks.borrow().is_empty()
    }

    /// Park until the next timer is due or another thread wakes us
    fn park_idle(&self) {
        if self.has_pending_work() {
            return;
        }
        let timeout = match self.timers.borrow().next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.config.park_timeout),
            None => self.config.park_timeout,
        };
        if !timeout.is_zero() {
            trace!(?timeout, "hub parking");
            self.ready.park(Some(timeout));
        }
    }

    fn enter_loop(&self) -> LoopGuard<'_> {
        if self.running.replace(true) {
            panic!("{}", SchedError::HubRunning);
        }
        LoopGuard { hub: self }
    }

    /// Drop every task (and its future) and forget queued callbacks
    fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "dropping unfinished tasks");
        }
        for cell in tasks.values() {
            let future = cell.take_future();
            cell.terminate();
            drop(future);
        }
        drop(tasks);
        let callbacks = std::mem::take(&mut *self.callbacks.borrow_mut());
        drop(callbacks);
        while self.ready.pop_callback().is_some() {}
    }
}

/// Resets the running flag even if a task panic unwinds through the loop
struct LoopGuard<'a> {
    hub: &'a HubShared,
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.hub.running.set(false);
    }
}

/// The hub of the current thread
///
/// Exactly one `Hub` may exist per thread at a time. Dropping it drops all
/// unfinished tasks. Tasks reach the hub through the free functions of this
/// module (`spawn`, `run_callback`, ...), which look it up thread-locally.
pub struct Hub {
    shared: Rc<HubShared>,
}

impl Hub {
    /// Create the hub for this thread
    ///
    /// Fails with `AlreadyInitialized` if this thread already has one, and
    /// with `InvalidConfig` if `config` does not validate.
    pub fn new(config: HubConfig) -> SchedResult<Self> {
        config.validate()?;
        let shared = Rc::new(HubShared::new(config));
        tls::install_hub(&shared)?;
        debug!(config = ?shared.config, "hub created");
        Ok(Self { shared })
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Spawn a task running `future`
    pub fn spawn<F>(&self, future: F) -> Task
    where
        F: Future<Output = ()> + 'static,
    {
        self.shared.spawn_task(None, Box::pin(future))
    }

    /// Spawn a named task running `future`
    pub fn spawn_named<F>(&self, name: impl Into<String>, future: F) -> Task
    where
        F: Future<Output = ()> + 'static,
    {
        self.shared.spawn_task(Some(name.into()), Box::pin(future))
    }

    /// Run `callback` on the loop during its next pass
    pub fn run_callback<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.shared.push_callback(Box::new(callback));
    }

    /// Run `callback` on the loop once `delay` has elapsed
    pub fn call_later<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.shared.insert_timer(TimerEntry::callback_after(delay, callback))
    }

    /// Cancel a timer from `call_later`; false if it already fired
    pub fn cancel_timer(&self, handle: TimerHandle) -> bool {
        self.shared.cancel_timer(handle)
    }

    /// Thread-safe handle for injecting callbacks from other threads
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            ready: Arc::clone(&self.shared.ready),
        }
    }

    /// Next value of the per-hub counter `key`, starting at 1
    pub fn next_sequence(&self, key: &str) -> u64 {
        self.shared.next_sequence(key)
    }

    /// Number of tasks that have not terminated
    pub fn task_count(&self) -> usize {
        self.shared.tasks.borrow().len()
    }

    /// Number of timers not yet fired or cancelled
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.borrow().len()
    }

    /// Run the loop until `future` completes, returning its output
    ///
    /// `future` runs as a task named "main", so it may await switchpoints.
    ///
    /// # Panics
    ///
    /// Panics if called while the loop is already running on this thread
    /// (from inside a task or callback), and re-raises panics of tasks.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let _running = self.shared.enter_loop();
        let output = Rc::new(Cell::new(None));
        let slot = Rc::clone(&output);
        self.shared.spawn_task(
            Some("main".to_owned()),
            Box::pin(async move {
                slot.set(Some(future.await));
            }),
        );

        loop {
            let progressed = self.shared.run_once();
            if let Some(value) = output.take() {
                return value;
            }
            if !progressed {
                self.shared.park_idle();
            }
        }
    }

    /// Run the loop until no tasks, callbacks or timers remain
    pub fn run(&self) {
        let _running = self.shared.enter_loop();
        loop {
            let progressed = self.shared.run_once();
            if self.task_count() == 0 && !self.shared.has_pending_work() && self.pending_timers() == 0 {
                return;
            }
            if !progressed {
                self.shared.park_idle();
            }
        }
    }

    /// Run passes until one does nothing; never waits for future timers
    pub fn run_until_idle(&self) {
        let _running = self.shared.enter_loop();
        while self.shared.run_once() {}
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shared.shutdown();
        tls::uninstall_hub(&self.shared);
        debug!("hub dropped");
    }
}

/// Thread-safe handle to a hub
///
/// The only way to hand work to a hub from another OS thread.
#[derive(Clone)]
pub struct RemoteHandle {
    ready: Arc<ReadyQueue>,
}

impl RemoteHandle {
    /// Queue `callback` to run on the hub thread and wake the hub
    pub fn run_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let callback: RemoteCallback = Box::new(callback);
        self.ready.push_callback(callback);
    }
}

fn with_hub<R>(f: impl FnOnce(&Rc<HubShared>) -> R) -> SchedResult<R> {
    tls::with_hub(f).ok_or(SchedError::NotInitialized)
}

/// Spawn a named task on this thread's hub
pub fn try_spawn_named<F>(name: impl Into<String>, future: F) -> SchedResult<Task>
where
    F: Future<Output = ()> + 'static,
{
    let name = name.into();
    with_hub(move |hub| hub.spawn_task(Some(name), Box::pin(future)))
}

/// Spawn a task on this thread's hub
///
/// # Panics
///
/// Panics if this thread has no hub.
pub fn spawn<F>(future: F) -> Task
where
    F: Future<Output = ()> + 'static,
{
    match with_hub(move |hub| hub.spawn_task(None, Box::pin(future))) {
        Ok(task) => task,
        Err(e) => panic!("spawn: {e}"),
    }
}

/// Spawn a named task on this thread's hub
///
/// # Panics
///
/// Panics if this thread has no hub.
pub fn spawn_named<F>(name: impl Into<String>, future: F) -> Task
where
    F: Future<Output = ()> + 'static,
{
    match try_spawn_named(name, future) {
        Ok(task) => task,
        Err(e) => panic!("spawn_named: {e}"),
    }
}

/// Run `callback` on this thread's hub during its next pass
pub fn run_callback<F>(callback: F) -> SchedResult<()>
where
    F: FnOnce() + 'static,
{
    with_hub(move |hub| hub.push_callback(Box::new(callback)))
}

/// Run `callback` on this thread's hub once `delay` has elapsed
pub fn call_later<F>(delay: Duration, callback: F) -> SchedResult<TimerHandle>
where
    F: FnOnce() + 'static,
{
    with_hub(move |hub| hub.insert_timer(TimerEntry::callback_after(delay, callback)))
}

/// Cancel a timer on this thread's hub; false if absent or already fired
pub fn cancel_timer(handle: TimerHandle) -> bool {
    tls::with_hub(|hub| hub.cancel_timer(handle)).unwrap_or(false)
}

/// Next value of this hub's counter `key`, starting at 1
pub fn next_sequence(key: &str) -> SchedResult<u64> {
    with_hub(|hub| hub.next_sequence(key))
}

/// Thread-safe handle to this thread's hub
pub fn remote() -> SchedResult<RemoteHandle> {
    with_hub(|hub| RemoteHandle {
        ready: Arc::clone(&hub.ready),
    })
}

/// Handle to the task currently running, if any
pub fn current_task() -> Option<Task> {
    tls::current_task().map(|cell| Task::from_cell(&cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sleep, yield_now, Gate};
    use cothread_core::TaskState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hub() -> Hub {
        Hub::new(HubConfig::new()).unwrap()
    }

    #[test]
    fn test_one_hub_per_thread() {
        let hub = hub();
        assert_eq!(Hub::new(HubConfig::new()).err(), Some(SchedError::AlreadyInitialized));
        drop(hub);
        assert!(Hub::new(HubConfig::new()).is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Hub::new(HubConfig::new().ready_batch(0));
        assert!(matches!(result, Err(SchedError::InvalidConfig(_))));
        assert!(!tls::has_hub());
    }

    #[test]
    fn test_free_functions_without_hub() {
        assert_eq!(run_callback(|| {}).err(), Some(SchedError::NotInitialized));
        assert_eq!(next_sequence("x").err(), Some(SchedError::NotInitialized));
        assert!(try_spawn_named("orphan", async {}).is_err());
        assert!(current_task().is_none());
    }

    #[test]
    fn test_block_on_returns_output() {
        let hub = hub();
        assert_eq!(hub.block_on(async { 40 + 2 }), 42);
        assert_eq!(hub.task_count(), 0);
    }

    #[test]
    fn test_task_ids_are_sequential() {
        let hub = hub();
        let a = hub.spawn(async {});
        let b = hub.spawn_named("worker", async {});
        assert_eq!(b.id().sequence(), a.id().sequence() + 1);
        assert_eq!(a.name(), format!("task-{}", a.id()));
        assert_eq!(b.name(), "worker");
        hub.run();
        assert!(!a.is_alive() && !b.is_alive());
    }

    #[test]
    fn test_task_states() {
        let hub = hub();
        let gate = Gate::new();
        let task = {
            let gate = gate.clone();
            hub.spawn(async move {
                let _ = gate.wait(None).await;
            })
        };
        assert_eq!(task.state(), TaskState::Ready);

        hub.run_until_idle();
        assert_eq!(task.state(), TaskState::Suspended);

        task.cancel();
        assert_eq!(task.state(), TaskState::Canceling);

        hub.run_until_idle();
        assert_eq!(task.state(), TaskState::Terminated);
        assert!(!task.cancel());
    }

    #[test]
    fn test_spawn_from_inside_task() {
        let hub = hub();
        let count = Rc::new(Cell::new(0));
        let inner = Rc::clone(&count);
        hub.block_on(async move {
            let child = spawn(async move {
                inner.set(inner.get() + 1);
            });
            child.join(None).await.unwrap();
        });
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_callbacks_and_call_later() {
        let hub = hub();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        hub.call_later(Duration::from_millis(10), move || l.borrow_mut().push("later"));
        let l = Rc::clone(&log);
        let cancelled = hub.call_later(Duration::from_millis(5), move || l.borrow_mut().push("never"));
        let l = Rc::clone(&log);
        hub.run_callback(move || l.borrow_mut().push("soon"));

        assert!(hub.cancel_timer(cancelled));
        hub.run();

        assert_eq!(*log.borrow(), vec!["soon", "later"]);
    }

    #[test]
    fn test_remote_callback_wakes_parked_hub() {
        let hub = hub();
        let remote = hub.remote();
        let hits = Arc::new(AtomicUsize::new(0));
        let gate = Gate::new();

        let waiter = gate.clone();
        let worker = {
            let hits = Arc::clone(&hits);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                remote.run_callback(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        // The gate is set by a local poller once the remote callback ran
        let probe = Arc::clone(&hits);
        hub.spawn(async move {
            while probe.load(Ordering::SeqCst) == 0 {
                sleep(Duration::from_millis(5)).await.unwrap();
            }
            gate.set();
        });
        hub.block_on(async move { waiter.wait(Some(Duration::from_secs(5))).await })
            .unwrap();

        worker.join().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fairness_with_busy_yielder() {
        let hub = hub();
        let progress = Rc::new(Cell::new(0));

        let spinner = hub.spawn(async {
            loop {
                if yield_now().await.is_err() {
                    break;
                }
            }
        });
        let p = Rc::clone(&progress);
        hub.block_on(async move {
            for _ in 0..100 {
                yield_now().await.unwrap();
                p.set(p.get() + 1);
            }
            spinner.cancel();
            spinner.join(None).await.unwrap();
        });
        assert_eq!(progress.get(), 100);
    }

    #[test]
    fn test_next_sequence_per_key() {
        let hub = hub();
        assert_eq!(hub.next_sequence("message"), 1);
        assert_eq!(hub.next_sequence("message"), 2);
        assert_eq!(next_sequence("datagram"), Ok(1));
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_task_panic_propagates() {
        let hub = hub();
        hub.spawn(async { panic!("boom") });
        hub.run_until_idle();
    }

    #[test]
    fn test_drop_hub_drops_unfinished_tasks() {
        let hub = hub();
        let gate = Gate::new();
        let task = {
            let gate = gate.clone();
            hub.spawn(async move {
                let _ = gate.wait(None).await;
            })
        };
        hub.run_until_idle();
        assert_eq!(gate.waiter_count(), 1);

        drop(hub);
        assert!(!task.is_alive());
        assert_eq!(gate.waiter_count(), 0);
    }
}
