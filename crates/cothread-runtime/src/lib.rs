//! # cothread-runtime
//!
//! Single-threaded cooperative scheduler ("hub") for the cothread stack.
//!
//! This crate provides:
//! - The hub loop: ready queue, timers and loop callbacks
//! - Tasks with cooperative cancellation
//! - Switchpoints: `sleep`, `yield_now`, `Gate::wait`, `BlockingQueue::get`
//! - Hub parking (futex on Linux, condvar elsewhere)
//!
//! Every hub is confined to the thread that created it. The one way in from
//! another thread is [`RemoteHandle::run_callback`].

pub mod config;
pub mod hub;
pub mod parking;
mod ready_queue;
pub mod switchpoint;
pub mod sync;
pub mod task;
pub mod timer;
pub mod tls;

// Re-exports
pub use config::HubConfig;
pub use hub::{
    call_later, cancel_timer, current_task, next_sequence, remote, run_callback, spawn, spawn_named,
    try_spawn_named, Hub, RemoteHandle,
};
pub use parking::{new_parking, HubParking};
pub use switchpoint::{sleep, yield_now, Sleep, YieldNow};
pub use sync::{BlockingQueue, Gate, GateWait, QueueGet};
pub use task::Task;
pub use timer::TimerHandle;
pub use tls::{current_task_id, has_hub, is_in_task};
