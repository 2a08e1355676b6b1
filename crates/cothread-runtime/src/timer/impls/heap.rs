//! BinaryHeap-based timer backend
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (lazy cancellation)
//! - Poll expired: O(k log n) where k = number of expired timers
//! - Next deadline: O(1) amortized
//!
//! # Cancellation Strategy
//!
//! Cancelled handles are stored in a HashSet and skipped when they reach
//! the top of the heap. Every switchpoint that wakes before its timeout
//! cancels its timer, so cancellation is far more common than firing.
//! Once cancelled entries make up more than half of the heap, it is
//! rebuilt without them.

use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use crate::timer::{TimerBackend, TimerEntry, TimerHandle};

/// Wrapper for heap ordering (min-heap by deadline)
struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: earliest deadline first, ties broken by creation order
        match other.0.deadline.cmp(&self.0.deadline) {
            std::cmp::Ordering::Equal => other.0.handle.raw().cmp(&self.0.handle.raw()),
            ord => ord,
        }
    }
}

/// BinaryHeap-based timer backend
///
/// Owned by a single hub; no internal locking.
pub struct HeapTimerBackend {
    heap: BinaryHeap<HeapEntry>,

    /// Handles currently in the heap
    live: HashSet<TimerHandle>,

    /// Live handles that were cancelled but not yet popped
    cancelled: HashSet<TimerHandle>,

    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl HeapTimerBackend {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            live: HashSet::with_capacity(capacity),
            cancelled: HashSet::new(),
            total_inserted: 0,
            total_fired: 0,
            total_cancelled: 0,
        }
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> HeapTimerStats {
        HeapTimerStats {
            active: self.len(),
            pending_cancellations: self.cancelled.len(),
            total_inserted: self.total_inserted,
            total_fired: self.total_fired,
            total_cancelled: self.total_cancelled,
        }
    }

    /// Drop cancelled entries sitting at the top of the heap
    fn purge_cancelled_head(&mut self) {
        while let Some(top) = self.heap.peek() {
            let handle = top.0.handle;
            if !self.cancelled.remove(&handle) {
                break;
            }
            self.heap.pop();
            self.live.remove(&handle);
        }
    }

    /// Rebuild the heap without cancelled entries
    fn compact(&mut self) {
        let cancelled = std::mem::take(&mut self.cancelled);
        self.heap.retain(|e| !cancelled.contains(&e.0.handle));
        for handle in &cancelled {
            self.live.remove(handle);
        }
    }
}

impl Default for HeapTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for HeapTimerBackend {
    fn insert(&mut self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        self.live.insert(handle);
        self.heap.push(HeapEntry(entry));
        self.total_inserted += 1;
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        if !self.live.contains(&handle) || !self.cancelled.insert(handle) {
            return false;
        }
        self.total_cancelled += 1;
        self.purge_cancelled_head();
        if self.cancelled.len() * 2 > self.live.len() {
            self.compact();
        }
        true
    }

    fn poll_expired(&mut self, now: Instant) -> Vec<TimerEntry> {
        let mut expired = Vec::new();

        while self.heap.peek().is_some_and(|top| top.0.deadline <= now) {
            let Some(HeapEntry(entry)) = self.heap.pop() else {
                break;
            };
            self.live.remove(&entry.handle);

            if self.cancelled.remove(&entry.handle) {
                continue;
            }

            self.total_fired += 1;
            expired.push(entry);
        }

        self.purge_cancelled_head();
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        // The head is never a cancelled entry (purged on cancel and poll)
        self.heap.peek().map(|e| e.0.deadline)
    }

    fn len(&self) -> usize {
        self.live.len() - self.cancelled.len()
    }

    fn name(&self) -> &'static str {
        "binary_heap"
    }
}

/// Statistics for HeapTimerBackend
#[derive(Debug, Clone)]
pub struct HeapTimerStats {
    /// Currently active (non-cancelled) timers
    pub active: usize,
    /// Cancelled but not yet removed from heap
    pub pending_cancellations: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}
