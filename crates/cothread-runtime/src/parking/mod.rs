//! Hub parking mechanism
//!
//! An idle hub parks its thread until a wake arrives from another thread
//! (a `Waker` fired off-thread, or a `RemoteHandle` callback) or until the
//! next timer is due. Platform-specific implementations use the most
//! efficient primitive available.

use std::time::Duration;

/// Platform-specific park/unpark pair for a single hub thread
///
/// Unlike a worker pool there is exactly one parker per hub, so a wake is
/// remembered as a token: an `unpark()` that arrives while the hub is busy
/// makes the next `park()` return immediately.
pub trait HubParking: Send + Sync {
    /// Park the hub thread until unparked or timeout
    ///
    /// Returns `true` if a wake token was consumed, `false` on timeout or
    /// spurious wakeup. Callers re-check for work either way.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Deposit a wake token, waking the hub if it is parked
    fn unpark(&self);

    /// Whether the hub thread is currently parked (hint, may be stale)
    fn is_parked(&self) -> bool;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn HubParking> {
    Box::new(PlatformParking::new())
}
