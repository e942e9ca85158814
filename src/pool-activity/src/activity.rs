//! Per-pool activity state machine (spec §4.E): scrub, error-scrub,
//! resilver, rebuild, initialize, trim, removal and raidz-expand each
//! drive the same generic {NONE, SCANNING, SUSPENDED, FINISHED, CANCELED}
//! shape over one `ActivityRecord`, gated by which commands a given kind
//! accepts and in which states.
//!
//! Rebuild's own state set in the spec table — `NONE, ACTIVE, COMPLETE,
//! CANCELED` — is the same shape as the generic one with `ACTIVE`/
//! `COMPLETE` renamed; it is folded into the same `ActivityState` rather
//! than duplicated as a parallel enum.

use std::time::{Duration, Instant};

use tracing::info;

use vdev_core::error::ErrorKind;
use vdev_core::events::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Scrub,
    ErrorScrub,
    Resilver,
    Rebuild,
    Initialize,
    Trim,
    Removal,
    RaidzExpand,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 8] = [
        ActivityKind::Scrub,
        ActivityKind::ErrorScrub,
        ActivityKind::Resilver,
        ActivityKind::Rebuild,
        ActivityKind::Initialize,
        ActivityKind::Trim,
        ActivityKind::Removal,
        ActivityKind::RaidzExpand,
    ];

    /// True iff this kind may be paused and resumed (scrub-family,
    /// initialize, trim). Resilver, rebuild, removal and raidz-expand run
    /// to completion or cancellation only (spec §4.E table).
    fn supports_suspend(self) -> bool {
        matches!(
            self,
            ActivityKind::Scrub
                | ActivityKind::ErrorScrub
                | ActivityKind::Initialize
                | ActivityKind::Trim
        )
    }

    /// Only `Initialize` accepts `UNINIT`, which wipes the record back to
    /// `NONE` instead of leaving it `FINISHED`/`CANCELED` (spec §4.E).
    fn supports_uninit(self) -> bool {
        matches!(self, ActivityKind::Initialize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    None,
    Scanning,
    Suspended,
    Finished,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityCommand {
    Start,
    Suspend,
    Cancel,
    Uninit,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RaidzExpandExtra {
    pub expanding_vdev_index: u32,
    pub reflowed_bytes: u64,
    pub to_reflow_bytes: u64,
    pub waiting_for_resilver: bool,
}

/// One activity's record (spec §3 "Activity record").
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub kind: ActivityKind,
    pub state: ActivityState,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub pause_time: Option<Timestamp>,
    pub examined: u64,
    pub to_examine: u64,
    pub issued: u64,
    pub repaired: u64,
    pub error_count: u64,
    pub raidz_expand: Option<RaidzExpandExtra>,
    pass_examined: u64,
    pass_issued: u64,
    pass_start: Instant,
    paused: Duration,
    pause_started_at: Option<Instant>,
}

const MIN_ISSUE_RATE_FOR_ETA: f64 = 10.0 * 1024.0 * 1024.0; // 10 MiB/s

impl ActivityRecord {
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            state: ActivityState::None,
            start_time: None,
            end_time: None,
            pause_time: None,
            examined: 0,
            to_examine: 0,
            issued: 0,
            repaired: 0,
            error_count: 0,
            raidz_expand: if kind == ActivityKind::RaidzExpand {
                Some(RaidzExpandExtra::default())
            } else {
                None
            },
            pass_examined: 0,
            pass_issued: 0,
            pass_start: Instant::now(),
            paused: Duration::ZERO,
            pause_started_at: None,
        }
    }

    fn reset_pass(&mut self) {
        self.pass_examined = 0;
        self.pass_issued = 0;
        self.pass_start = Instant::now();
        self.paused = Duration::ZERO;
        self.pause_started_at = None;
    }

    /// Apply one command (spec §4.E policy): cancel-while-none errors,
    /// start-while-scanning is a no-op success, start-while-suspended
    /// resumes and resets the pass.
    pub fn apply(&mut self, command: ActivityCommand) -> Result<(), ErrorKind> {
        match command {
            ActivityCommand::Start => match self.state {
                ActivityState::None | ActivityState::Finished | ActivityState::Canceled => {
                    self.state = ActivityState::Scanning;
                    self.start_time = Some(Timestamp::now());
                    self.end_time = None;
                    self.examined = 0;
                    self.to_examine = 0;
                    self.issued = 0;
                    self.repaired = 0;
                    self.error_count = 0;
                    self.reset_pass();
                    info!(kind = ?self.kind, "activity started");
                    Ok(())
                }
                ActivityState::Suspended => {
                    self.state = ActivityState::Scanning;
                    self.pause_time = None;
                    self.reset_pass();
                    info!(kind = ?self.kind, "activity resumed");
                    Ok(())
                }
                ActivityState::Scanning => Ok(()), // no-op success
            },
            ActivityCommand::Suspend => {
                if !self.kind.supports_suspend() {
                    return Err(ErrorKind::UnsupportedOperation(
                        std::path::PathBuf::new(),
                        "activity kind does not support suspend",
                    ));
                }
                match self.state {
                    ActivityState::Scanning => {
                        self.state = ActivityState::Suspended;
                        self.pause_time = Some(Timestamp::now());
                        self.pause_started_at = Some(Instant::now());
                        info!(kind = ?self.kind, "activity suspended");
                        Ok(())
                    }
                    _ => Err(ErrorKind::NotActive(
                        "activity not scanning, cannot suspend".into(),
                    )),
                }
            }
            ActivityCommand::Cancel => match self.state {
                ActivityState::None => {
                    Err(ErrorKind::NotActive("activity is not active".into()))
                }
                _ => {
                    if let Some(started) = self.pause_started_at.take() {
                        self.paused += started.elapsed();
                    }
                    self.state = ActivityState::Canceled;
                    self.end_time = Some(Timestamp::now());
                    info!(kind = ?self.kind, "activity canceled");
                    Ok(())
                }
            },
            ActivityCommand::Uninit => {
                if !self.kind.supports_uninit() {
                    return Err(ErrorKind::UnsupportedOperation(
                        std::path::PathBuf::new(),
                        "only initialize supports uninit",
                    ));
                }
                *self = ActivityRecord::new(self.kind);
                info!(kind = ?self.kind, "activity uninitialized");
                Ok(())
            }
        }
    }

    /// Marks the activity finished (called by the background worker
    /// simulation, not a client-issued command).
    pub fn finish(&mut self) {
        if let Some(started) = self.pause_started_at.take() {
            self.paused += started.elapsed();
        }
        self.state = ActivityState::Finished;
        self.end_time = Some(Timestamp::now());
    }

    /// Bumps progress counters within the current pass (monotonically
    /// non-decreasing per spec §4.E).
    pub fn add_progress(&mut self, examined: u64, issued: u64, repaired: u64) {
        self.examined += examined;
        self.issued += issued;
        self.repaired += repaired;
        self.pass_examined += examined;
        self.pass_issued += issued;
    }

    fn elapsed_pass_secs(&self) -> u64 {
        let extra_paused = self
            .pause_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.pass_start
            .elapsed()
            .saturating_sub(self.paused + extra_paused)
            .as_secs()
            .max(1)
    }

    pub fn scan_rate(&self) -> f64 {
        self.pass_examined as f64 / self.elapsed_pass_secs() as f64
    }

    pub fn issue_rate(&self) -> f64 {
        self.pass_issued as f64 / self.elapsed_pass_secs() as f64
    }

    /// Estimated seconds to completion, or `None` if the spec's ETA
    /// preconditions aren't met (§4.E).
    pub fn eta_secs(&self) -> Option<u64> {
        if self.to_examine <= self.issued {
            return None;
        }
        let issue_rate = self.issue_rate();
        if issue_rate < MIN_ISSUE_RATE_FOR_ETA {
            return None;
        }
        let eligible = match self.kind {
            ActivityKind::Resilver | ActivityKind::Rebuild => self.repaired > 0,
            ActivityKind::Scrub | ActivityKind::ErrorScrub => self.issued > 0,
            _ => false,
        };
        if !eligible {
            return None;
        }
        let remaining = (self.to_examine - self.issued) as f64;
        Some((remaining / issue_rate).ceil() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_while_none_is_not_active() {
        let mut rec = ActivityRecord::new(ActivityKind::Scrub);
        let err = rec.apply(ActivityCommand::Cancel).unwrap_err();
        assert!(matches!(err, ErrorKind::NotActive(_)));
    }

    #[test]
    fn start_while_scanning_is_noop_success() {
        let mut rec = ActivityRecord::new(ActivityKind::Scrub);
        rec.apply(ActivityCommand::Start).unwrap();
        rec.add_progress(10, 10, 0);
        rec.apply(ActivityCommand::Start).unwrap();
        assert_eq!(rec.state, ActivityState::Scanning);
        // a no-op start does not reset progress already accumulated
        assert_eq!(rec.examined, 10);
    }

    #[test]
    fn suspend_then_resume_resets_pass_counters() {
        let mut rec = ActivityRecord::new(ActivityKind::Scrub);
        rec.apply(ActivityCommand::Start).unwrap();
        rec.add_progress(100, 100, 0);
        rec.apply(ActivityCommand::Suspend).unwrap();
        assert_eq!(rec.state, ActivityState::Suspended);
        rec.apply(ActivityCommand::Start).unwrap();
        assert_eq!(rec.state, ActivityState::Scanning);
        assert_eq!(rec.pass_examined, 0);
        // totals survive the pause, only the pass counters reset
        assert_eq!(rec.examined, 100);
    }

    #[test]
    fn resilver_rejects_suspend() {
        let mut rec = ActivityRecord::new(ActivityKind::Resilver);
        rec.apply(ActivityCommand::Start).unwrap();
        let err = rec.apply(ActivityCommand::Suspend).unwrap_err();
        assert!(matches!(err, ErrorKind::UnsupportedOperation(_, _)));
    }

    #[test]
    fn uninit_wipes_initialize_record() {
        let mut rec = ActivityRecord::new(ActivityKind::Initialize);
        rec.apply(ActivityCommand::Start).unwrap();
        rec.add_progress(5, 5, 0);
        rec.apply(ActivityCommand::Uninit).unwrap();
        assert_eq!(rec.state, ActivityState::None);
        assert_eq!(rec.examined, 0);
    }

    #[test]
    fn eta_requires_nonzero_issued_for_scrub() {
        let mut rec = ActivityRecord::new(ActivityKind::Scrub);
        rec.apply(ActivityCommand::Start).unwrap();
        rec.to_examine = 1_000_000_000;
        assert_eq!(rec.eta_secs(), None);
    }
}
