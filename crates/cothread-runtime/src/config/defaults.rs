//! Library defaults for `HubConfig`

/// Maximum tasks resumed in one pass of the hub loop
pub const READY_BATCH: usize = 256;

/// Initial capacity of the task table
pub const TASK_CAPACITY: usize = 64;

/// Initial capacity of the timer heap
pub const TIMER_CAPACITY: usize = 64;

/// Upper bound on a single idle park, in milliseconds
pub const PARK_TIMEOUT_MS: u64 = 1000;
