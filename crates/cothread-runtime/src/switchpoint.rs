//! Switchpoints
//!
//! A switchpoint is the only place a task may give up control. Every
//! switchpoint future starts each poll with [`check`], which enforces the
//! two rules shared by all of them:
//!
//! - it must run inside a task; anywhere else is a programming error and
//!   panics instead of blocking the hub thread
//! - a pending cancellation is delivered here, exactly once, as
//!   `Err(SchedError::Cancelled)`

use crate::timer::Deadline;
use crate::tls;
use cothread_core::{SchedError, SchedResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::trace;

/// Entry check for a switchpoint named `op`
///
/// # Panics
///
/// Panics when called outside a task.
pub(crate) fn check(op: &'static str) -> SchedResult<()> {
    let Some(task) = tls::current_task() else {
        panic!("{op} is a switchpoint and must be awaited inside a task spawned on a hub");
    };
    if task.take_cancel() {
        trace!(task = %task.id(), op, "cancellation delivered");
        return Err(SchedError::Cancelled);
    }
    Ok(())
}

/// Suspend the current task for `duration`
///
/// Switchpoint. Fails only with `Cancelled`.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        deadline: Deadline::new(Some(duration)),
    }
}

/// Future returned by [`sleep`]
#[must_use = "switchpoints do nothing unless awaited"]
#[derive(Debug)]
pub struct Sleep {
    deadline: Deadline,
}

impl Future for Sleep {
    type Output = SchedResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Err(e) = check("sleep") {
            this.deadline.disarm();
            return Poll::Ready(Err(e));
        }
        if this.deadline.poll_elapsed(cx) {
            return Poll::Ready(Ok(()));
        }
        Poll::Pending
    }
}

/// Let every other ready task run once before continuing
///
/// Switchpoint. Fails only with `Cancelled`.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`]
#[must_use = "switchpoints do nothing unless awaited"]
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = SchedResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        check("yield_now")?;
        if self.yielded {
            return Poll::Ready(Ok(()));
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hub, HubConfig};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Instant;

    fn hub() -> Hub {
        Hub::new(HubConfig::new()).unwrap()
    }

    #[test]
    fn test_sleep_elapses() {
        let hub = hub();
        let start = Instant::now();
        let result = hub.block_on(sleep(Duration::from_millis(30)));
        assert_eq!(result, Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_yield_interleaves_tasks() {
        let hub = hub();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b"] {
            let log = Rc::clone(&log);
            hub.spawn(async move {
                for i in 0..3 {
                    log.borrow_mut().push(format!("{name}{i}"));
                    yield_now().await.unwrap();
                }
            });
        }
        hub.run();

        assert_eq!(*log.borrow(), ["a0", "b0", "a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_cancelled_sleep_can_run_blocking_cleanup() {
        let hub = hub();
        let log = Rc::new(RefCell::new(Vec::new()));

        let sleeper = {
            let log = Rc::clone(&log);
            hub.spawn(async move {
                let first = sleep(Duration::from_secs(60)).await;
                log.borrow_mut().push(format!("{first:?}"));
                // Cancellation is delivered once: cleanup may suspend again
                let cleanup = sleep(Duration::from_millis(1)).await;
                log.borrow_mut().push(format!("{cleanup:?}"));
            })
        };

        hub.block_on(async move {
            yield_now().await.unwrap();
            sleeper.cancel();
            sleeper.join(None).await.unwrap();
        });

        assert_eq!(*log.borrow(), ["Err(Cancelled)", "Ok(())"]);
        assert_eq!(hub.pending_timers(), 0);
    }

    #[test]
    fn test_self_cancel_observed_at_next_switchpoint() {
        let hub = hub();
        let result = hub.block_on(async {
            let me = crate::current_task().unwrap();
            me.cancel();
            // No switchpoint yet: still running normally
            let observed_before = me.state();
            (observed_before, yield_now().await)
        });
        assert_eq!(result.0, cothread_core::TaskState::Canceling);
        assert_eq!(result.1, Err(SchedError::Cancelled));
    }

    #[test]
    #[should_panic(expected = "sleep is a switchpoint")]
    fn test_sleep_outside_task_panics() {
        let _hub = hub();
        let _ = futures::executor::block_on(sleep(Duration::from_millis(1)));
    }
}
