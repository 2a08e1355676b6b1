//! # cothread - cooperative tasks for blocking-style protocol code
//!
//! Write "read this, then write that" protocol logic against callback-driven
//! transports. Each OS thread runs one hub; tasks on it are suspended and
//! resumed only at switchpoints, so a task keeps control until it awaits
//! one and no locking is needed between tasks.
//!
//! ## Features
//!
//! - **Hub**: single-threaded scheduler with timers, loop callbacks and a
//!   thread-safe remote handle
//! - **Switchpoints**: `sleep`, `yield_now`, `Gate::wait`, `BlockingQueue::get`
//! - **Cancellation**: delivered once, at the next switchpoint, as `Err(Cancelled)`
//! - **Protocols**: watermark flow control in both directions, sticky errors,
//!   message dispatch on a dedicated task
//!
//! ## Quick Start
//!
//! ```ignore
//! use cothread::{Hub, HubConfig, Gate, sleep};
//! use std::time::Duration;
//!
//! fn main() {
//!     cothread::init_logging();
//!     let hub = Hub::new(HubConfig::from_env()).unwrap();
//!
//!     let ready = Gate::new();
//!     let signal = ready.clone();
//!     hub.spawn(async move {
//!         sleep(Duration::from_millis(10)).await.unwrap();
//!         signal.set();
//!     });
//!
//!     hub.block_on(async move { ready.wait(None).await }).unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        write().await, get_message().await, handlers         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   cothread-protocol                         │
//! │  ConnectionState, StreamProtocol, MessageProtocol, Datagram │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Gate / BlockingQueue
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   cothread-runtime                          │
//! │        Hub: ready queue, timer heap, loop callbacks         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │            Hub parking (futex / condvar)                │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use cothread_core::{SchedError, SchedResult, TaskId, TaskState};

// Re-export env utilities
pub use cothread_core::{env_get, env_get_bool, env_get_millis, env_get_opt};

// Re-export runtime types
pub use cothread_runtime::{
    call_later, cancel_timer, current_task, current_task_id, is_in_task, next_sequence, remote,
    run_callback, sleep, spawn, spawn_named, try_spawn_named, yield_now, BlockingQueue, Gate, Hub,
    HubConfig, RemoteHandle, Task, TimerHandle,
};

// Re-export protocol types
pub use cothread_protocol::{
    pipe, Condition, ConnectionState, DatagramCallbacks, DatagramProtocol, Decoder, LineDecoder,
    MessageHandler, MessageProtocol, Protocol, ProtocolError, ProtocolResult, ReadBufferLimits,
    StreamCallbacks, StreamProtocol, Transport, TransportRef,
};

pub use cothread_protocol as protocol;
pub use cothread_runtime as runtime;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`EnvFilter` syntax)
pub const LOG_ENV: &str = "COT_LOG";

/// Install a `tracing` fmt subscriber filtered by `COT_LOG`
///
/// Defaults to `info` when `COT_LOG` is unset or invalid. Only the first
/// call installs anything, and it backs off if the application already
/// set a global subscriber.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
