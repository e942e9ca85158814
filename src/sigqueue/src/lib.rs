//! A condition-variable-backed wait/notify primitive shared by the
//! completion dispatcher's worker-wakeup path and the pool activity
//! waiter's "block until quiescent" path (spec §4.F, §5).
//!
//! The teacher codebase factors this kind of thing into its own crate
//! (`gruel`) rather than reimplementing a wait loop at every call site, so
//! that shape is kept here. `gruel`'s actual implementation is an
//! atomic-mask signal channel built to bridge a VMM's vCPU park/unpark
//! calls into an io_uring/kqueue-driven event loop; the spec's own wording
//! for §4.F ("block on a condition variable with absolute deadline...
//! handling spurious wakeups with a condition-variable predicate") is a
//! closer match for `std::sync::Condvar` than for that mask-based design,
//! so this crate wraps `Condvar` directly instead of porting the mask
//! machinery.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

/// Shared mutable state `T` plus a condition variable signaled on every
/// mutation made through [`Signal::update`].
pub struct Signal<T> {
    state: Mutex<T>,
    cv: Condvar,
}

impl<T: Clone> Signal<T> {
    pub fn new(initial: T) -> Self {
        Self {
            state: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Read the current state without waiting.
    pub fn get(&self) -> T {
        self.state.lock().unwrap().clone()
    }

    /// Mutate the state under the lock, then wake every waiter. Spurious
    /// wakeups are the waiter's problem to filter via its predicate, per
    /// the usual condvar contract.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard);
        drop(guard);
        self.cv.notify_all();
    }

    /// Block until `pred` holds for the current state, or `deadline`
    /// passes. `deadline = None` waits indefinitely.
    pub fn wait_until(
        &self,
        deadline: Option<Instant>,
        mut pred: impl FnMut(&T) -> bool,
    ) -> Result<T, TimedOut> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if pred(&guard) {
                return Ok(guard.clone());
            }
            match deadline {
                None => {
                    guard = self.cv.wait(guard).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TimedOut);
                    }
                    let (next_guard, timeout_result) =
                        self.cv.wait_timeout(guard, deadline - now).unwrap();
                    guard = next_guard;
                    if timeout_result.timed_out() && !pred(&guard) {
                        return Err(TimedOut);
                    }
                }
            }
        }
    }

    pub fn wait(&self, pred: impl FnMut(&T) -> bool) -> T {
        self.wait_until(None, pred).unwrap()
    }

    pub fn wait_timeout(
        &self,
        timeout: Duration,
        pred: impl FnMut(&T) -> bool,
    ) -> Result<T, TimedOut> {
        self.wait_until(Some(Instant::now() + timeout), pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_wakes_on_update() {
        let sig = Arc::new(Signal::new(0u32));
        let sig2 = sig.clone();
        let handle = thread::spawn(move || {
            sig2.update(|v| *v = 42);
        });
        let result = sig.wait(|v| *v == 42);
        assert_eq!(result, 42);
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_without_update() {
        let sig: Signal<u32> = Signal::new(0);
        let result = sig.wait_timeout(Duration::from_millis(20), |v| *v == 1);
        assert_eq!(result, Err(TimedOut));
    }

    #[test]
    fn wait_timeout_sees_predicate_already_true() {
        let sig: Signal<u32> = Signal::new(7);
        let result = sig.wait_timeout(Duration::from_millis(20), |v| *v == 7);
        assert_eq!(result, Ok(7));
    }
}
