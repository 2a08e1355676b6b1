//! Linux futex-based hub parking
//!
//! Futex word semantics:
//! - 0 = no wake token
//! - 1 = wake token pending
//!
//! `park()` consumes the token with a swap before sleeping, so FUTEX_WAIT
//! only blocks while the word is still 0. `unpark()` always deposits the
//! token and only issues FUTEX_WAKE when the hub advertises it is parked.

use super::HubParking;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Linux futex-based parking
pub struct FutexParking {
    /// Futex word: 0 = sleep, 1 = wake pending
    futex: AtomicU32,

    /// Set while the hub thread is inside `park()`
    parked: AtomicBool,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicBool::new(false),
        }
    }

    fn futex_wait(&self, timeout: Option<Duration>) {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });

        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Returns early with EAGAIN if the word is no longer 0, with
        // ETIMEDOUT on timeout and EINTR on signals. The caller re-checks
        // the word in every case, so the result is not inspected.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl HubParking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.store(true, Ordering::SeqCst);

        if self.futex.swap(0, Ordering::SeqCst) != 0 {
            self.parked.store(false, Ordering::SeqCst);
            return true;
        }

        self.futex_wait(timeout);

        self.parked.store(false, Ordering::SeqCst);
        self.futex.swap(0, Ordering::SeqCst) != 0
    }

    fn unpark(&self) {
        self.futex.store(1, Ordering::SeqCst);

        if !self.parked.load(Ordering::SeqCst) {
            return;
        }

        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Relaxed)
    }
}
