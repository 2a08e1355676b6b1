//! Timer backend implementations
//!
//! Currently provides:
//! - `HeapTimerBackend` - BinaryHeap with lazy cancellation

mod heap;

pub use heap::{HeapTimerBackend, HeapTimerStats};

use crate::timer::TimerBackend;

/// Create the hub's timer backend with room for `capacity` timers
pub fn create_backend(capacity: usize) -> Box<dyn TimerBackend> {
    Box::new(HeapTimerBackend::with_capacity(capacity))
}
