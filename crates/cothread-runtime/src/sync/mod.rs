//! Synchronization primitives for tasks
//!
//! - `Gate` - one-shot boolean signal, wakes every waiter on `set()`
//! - `BlockingQueue` - unbounded FIFO with suspending `get()`
//!
//! Both are single-threaded (`Rc`-based) and bound to the hub of the
//! thread that uses them.

mod gate;
mod queue;
mod waiter;

pub use gate::{Gate, GateWait};
pub use queue::{BlockingQueue, QueueGet};
