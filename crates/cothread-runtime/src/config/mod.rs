//! Hub configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env()`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use cothread_runtime::config::HubConfig;
//!
//! let config = HubConfig::from_env()
//!     .ready_batch(64)
//!     .park_timeout(Duration::from_millis(100));
//! ```

pub mod defaults;

use cothread_core::env::{env_get, env_get_millis};
use cothread_core::SchedError;
use std::time::Duration;

/// Hub configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum tasks resumed per loop pass before timers and callbacks
    /// get another look
    pub ready_batch: usize,
    /// Initial capacity of the task table
    pub task_capacity: usize,
    /// Initial capacity of the timer heap
    pub timer_capacity: usize,
    /// Longest single park when idle with no timer due
    pub park_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HubConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `COT_READY_BATCH` - Tasks resumed per loop pass
    /// - `COT_TASK_CAPACITY` - Initial task table capacity
    /// - `COT_TIMER_CAPACITY` - Initial timer heap capacity
    /// - `COT_PARK_TIMEOUT_MS` - Idle park bound in milliseconds
    pub fn from_env() -> Self {
        Self {
            ready_batch: env_get("COT_READY_BATCH", defaults::READY_BATCH),
            task_capacity: env_get("COT_TASK_CAPACITY", defaults::TASK_CAPACITY),
            timer_capacity: env_get("COT_TIMER_CAPACITY", defaults::TIMER_CAPACITY),
            park_timeout: env_get_millis("COT_PARK_TIMEOUT_MS", defaults::PARK_TIMEOUT_MS),
        }
    }

    /// Create config with library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            ready_batch: defaults::READY_BATCH,
            task_capacity: defaults::TASK_CAPACITY,
            timer_capacity: defaults::TIMER_CAPACITY,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
        }
    }

    pub fn ready_batch(mut self, n: usize) -> Self {
        self.ready_batch = n;
        self
    }

    pub fn task_capacity(mut self, n: usize) -> Self {
        self.task_capacity = n;
        self
    }

    pub fn timer_capacity(mut self, n: usize) -> Self {
        self.timer_capacity = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.ready_batch == 0 {
            return Err(SchedError::InvalidConfig("ready_batch must be at least 1".into()));
        }
        if self.park_timeout.is_zero() {
            return Err(SchedError::InvalidConfig("park_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HubConfig::new();
        assert_eq!(config.ready_batch, defaults::READY_BATCH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validate() {
        let config = HubConfig::new().ready_batch(0);
        assert!(matches!(config.validate(), Err(SchedError::InvalidConfig(_))));

        let config = HubConfig::new().park_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = HubConfig::new()
            .ready_batch(8)
            .task_capacity(4)
            .timer_capacity(4)
            .park_timeout(Duration::from_millis(5));
        assert!(config.validate().is_ok());
        assert_eq!(config.ready_batch, 8);
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("COT_TIMER_CAPACITY", "17");
        let config = HubConfig::from_env();
        assert_eq!(config.timer_capacity, 17);
        std::env::remove_var("COT_TIMER_CAPACITY");
    }
}
