//! # cothread-core
//!
//! Core types for the cothread cooperative scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The hub, timers and synchronization primitives live in `cothread-runtime`.
//!
//! ## Modules
//!
//! - `id` - Task identifier type
//! - `state` - Task lifecycle state
//! - `error` - Error types shared by every switchpoint
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use id::TaskId;
pub use state::TaskState;
pub use error::{SchedError, SchedResult};
pub use env::{env_get, env_get_bool, env_get_millis, env_get_opt};
