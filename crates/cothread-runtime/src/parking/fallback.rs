//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.

use super::HubParking;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Condvar-based parking (fallback)
pub struct FallbackParking {
    /// `true` while a wake token is pending
    token: Mutex<bool>,

    condvar: Condvar,

    parked: AtomicBool,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicBool::new(false),
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl HubParking for FallbackParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);

        if !*guard {
            self.parked.store(true, Ordering::SeqCst);
            guard = match timeout {
                Some(t) => {
                    self.condvar
                        .wait_timeout(guard, t)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner),
            };
            self.parked.store(false, Ordering::SeqCst);
        }

        std::mem::replace(&mut *guard, false)
    }

    fn unpark(&self) {
        {
            let mut guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = true;
        }
        self.condvar.notify_one();
    }

    fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Relaxed)
    }
}
