//! Progress observer and waiter (spec §4.F): a status thread refreshes and
//! prints a pool's activity rows on an interval while the calling thread
//! blocks until the requested activities leave their non-terminal states.
//!
//! Grounded on [`sigqueue::Signal`] for the cooperative shutdown handshake
//! the spec describes ("status thread sleeps using an absolute-time
//! condition wait; shutdown is signaled by setting `should_exit` under the
//! wait-mutex and signaling the cond-var").

use std::thread;
use std::time::{Duration, Instant};

use sigqueue::Signal;
use vdev_core::error::ErrorKind;

use crate::activity::{ActivityKind, ActivityState};
use crate::pool::PoolHandle;

pub fn is_terminal(state: ActivityState) -> bool {
    matches!(
        state,
        ActivityState::None | ActivityState::Finished | ActivityState::Canceled
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every requested activity reached a terminal state.
    Quiesced,
    /// The pool disappeared between polls (spec §4.F "status thread exits
    /// with success 0; waiters on the main thread observe 'missing'").
    Missing,
}

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub print_status: bool,
    /// `None` waits indefinitely.
    pub deadline: Option<Instant>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            print_status: false,
            deadline: None,
        }
    }
}

/// Blocks the caller until every activity in `kinds` reaches a terminal
/// state, or the pool disappears. `on_tick` is invoked with a snapshot of
/// each requested activity's state on each status-thread tick, standing in
/// for the CLI's "print a row with per-activity bytes-remaining" behavior
/// (spec §4.F) without coupling this library to stdout formatting.
pub fn wait(
    pool: &dyn PoolHandle,
    kinds: &[ActivityKind],
    opts: WaitOptions,
    on_tick: impl Fn(&dyn PoolHandle) + Send + Sync,
) -> Result<WaitOutcome, ErrorKind> {
    let should_exit: Signal<bool> = Signal::new(false);

    let outcome = thread::scope(|scope| {
        if opts.print_status && !opts.poll_interval.is_zero() {
            scope.spawn(|| {
                loop {
                    let exited = should_exit
                        .wait_timeout(opts.poll_interval, |exit| *exit)
                        .unwrap_or(false);
                    if exited {
                        return;
                    }
                    on_tick(pool);
                }
            });
        }

        let result = loop {
            let refreshed = pool.refresh_stats();
            if refreshed.missing {
                break Ok(WaitOutcome::Missing);
            }
            if let Some(err) = refreshed.error {
                break Err(err);
            }
            if kinds
                .iter()
                .all(|&k| is_terminal(pool.activity(k).state))
            {
                break Ok(WaitOutcome::Quiesced);
            }
            if let Some(deadline) = opts.deadline {
                if Instant::now() >= deadline {
                    break Err(ErrorKind::Timeout);
                }
            }
            thread::sleep(Duration::from_millis(20).min(opts.poll_interval));
        };
        should_exit.update(|v| *v = true);
        result
    });

    outcome
}

/// Bytes-remaining for one activity (spec §4.F calculation table): for
/// initialize/trim this sums leaf-vdev estimate-minus-done; for the other
/// kinds it is simply `to_examine - issued` (or the raidz-expand/removal
/// analogues folded onto the same two fields by the caller).
pub fn bytes_remaining(kind: ActivityKind, record: &crate::activity::ActivityRecord) -> u64 {
    match kind {
        ActivityKind::RaidzExpand => record
            .raidz_expand
            .map(|ex| ex.to_reflow_bytes.saturating_sub(ex.reflowed_bytes))
            .unwrap_or(0),
        _ => record.to_examine.saturating_sub(record.issued),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityCommand;
    use crate::memory::MemoryPool;
    use crate::pool::VdevNode;
    use std::sync::Arc;

    fn pool() -> Arc<MemoryPool> {
        Arc::new(MemoryPool::new(
            "tank",
            VdevNode::Leaf {
                path: "/dev/sda1".into(),
                healthy: true,
            },
        ))
    }

    #[test]
    fn quiesces_when_activity_finishes() {
        let pool = pool();
        pool.trigger(ActivityKind::Scrub, ActivityCommand::Start)
            .unwrap();

        let worker_pool = pool.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            worker_pool.finish_activity(ActivityKind::Scrub);
        });

        let outcome = wait(
            pool.as_ref(),
            &[ActivityKind::Scrub],
            WaitOptions {
                poll_interval: Duration::from_millis(10),
                print_status: true,
                deadline: Some(Instant::now() + Duration::from_secs(5)),
            },
            |_| {},
        )
        .unwrap();
        worker.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Quiesced);
    }

    #[test]
    fn reports_missing_pool() {
        let pool = pool();
        pool.set_missing(true);
        let outcome = wait(
            pool.as_ref(),
            &[ActivityKind::Scrub],
            WaitOptions::default(),
            |_| {},
        )
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Missing);
    }

    #[test]
    fn times_out_on_never_finishing_activity() {
        let pool = pool();
        pool.trigger(ActivityKind::Scrub, ActivityCommand::Start)
            .unwrap();
        let err = wait(
            pool.as_ref(),
            &[ActivityKind::Scrub],
            WaitOptions {
                poll_interval: Duration::from_millis(10),
                print_status: false,
                deadline: Some(Instant::now() + Duration::from_millis(50)),
            },
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, ErrorKind::Timeout));
    }
}
