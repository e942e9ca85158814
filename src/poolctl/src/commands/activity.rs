//! `scrub`, `resilver`, `trim`, `initialize`, `checkpoint`, `wait` (spec
//! §6.1, §4.E, §4.F).

use std::time::Duration;

use anyhow::{bail, Result};
use pool_activity::activity::{ActivityCommand, ActivityKind};
use pool_activity::pool::PoolHandle;
use pool_activity::waiter::{self, WaitOptions};

use crate::registry;

pub fn scrub(pool_name: &str, stop: bool, pause: bool, error_scrub: bool, wait: bool) -> Result<()> {
    let pool = registry::open(pool_name, &[])?;
    let kind = if error_scrub {
        ActivityKind::ErrorScrub
    } else {
        ActivityKind::Scrub
    };
    let command = if stop {
        ActivityCommand::Cancel
    } else if pause {
        ActivityCommand::Suspend
    } else {
        ActivityCommand::Start
    };
    pool.trigger(kind, command)?;
    if wait && !stop && !pause {
        waiter::wait(&pool, &[kind], WaitOptions::default(), |_| {})?;
    }
    println!("{pool_name}: scrub {command_word}", command_word = word(command));
    Ok(())
}

pub fn resilver(pool_name: &str) -> Result<()> {
    let pool = registry::open(pool_name, &[])?;
    pool.trigger(ActivityKind::Resilver, ActivityCommand::Start)?;
    println!("{pool_name}: resilver restarted");
    Ok(())
}

pub fn trim(
    pool_name: &str,
    cancel: bool,
    secure: bool,
    rate: Option<u64>,
    suspend: bool,
    wait: bool,
) -> Result<()> {
    let _ = (secure, rate); // forwarded to the background worker, not modeled by this core
    let pool = registry::open(pool_name, &[])?;
    let command = if cancel {
        ActivityCommand::Cancel
    } else if suspend {
        ActivityCommand::Suspend
    } else {
        ActivityCommand::Start
    };
    pool.trigger(ActivityKind::Trim, command)?;
    if wait && command == ActivityCommand::Start {
        waiter::wait(&pool, &[ActivityKind::Trim], WaitOptions::default(), |_| {})?;
    }
    println!("{pool_name}: trim {}", word(command));
    Ok(())
}

pub fn initialize(pool_name: &str, cancel: bool, suspend: bool, uninit: bool, wait: bool) -> Result<()> {
    let pool = registry::open(pool_name, &[])?;
    let command = if uninit {
        ActivityCommand::Uninit
    } else if cancel {
        ActivityCommand::Cancel
    } else if suspend {
        ActivityCommand::Suspend
    } else {
        ActivityCommand::Start
    };
    pool.trigger(ActivityKind::Initialize, command)?;
    if wait && command == ActivityCommand::Start {
        waiter::wait(
            &pool,
            &[ActivityKind::Initialize],
            WaitOptions::default(),
            |_| {},
        )?;
    }
    println!("{pool_name}: initialize {}", word(command));
    Ok(())
}

pub fn checkpoint(pool_name: &str, discard: bool, wait: bool) -> Result<()> {
    let pool = registry::open(pool_name, &[])?;
    if discard {
        pool.discard_checkpoint()?;
        if wait {
            // discard has no dedicated ActivityKind (spec §3 models it as
            // the checkpoint record's own NONE/EXISTS/DISCARDING machine);
            // poll the record directly instead of the generic waiter.
            loop {
                if pool.checkpoint().state == pool_activity::checkpoint::CheckpointState::None {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        println!("{pool_name}: checkpoint discard started");
    } else {
        pool.create_checkpoint(0)?;
        println!("{pool_name}: checkpoint created");
    }
    Ok(())
}

fn word(command: ActivityCommand) -> &'static str {
    match command {
        ActivityCommand::Start => "started",
        ActivityCommand::Suspend => "suspended",
        ActivityCommand::Cancel => "cancelled",
        ActivityCommand::Uninit => "cleared",
    }
}

/// A parsed `wait -t` target: either an `ActivityKind` or the
/// checkpoint-discard pseudo-activity, which has no `ActivityKind` of its
/// own (spec §3 models it as the checkpoint record's own NONE/EXISTS/
/// DISCARDING machine rather than an activity record).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Activity(ActivityKind),
    CheckpointDiscard,
}

pub fn parse_wait_targets(selectors: &[String]) -> Result<Vec<WaitTarget>> {
    let mut targets = Vec::new();
    for s in selectors {
        let target = match s.as_str() {
            "initialize" => WaitTarget::Activity(ActivityKind::Initialize),
            "replace" | "resilver" => WaitTarget::Activity(ActivityKind::Resilver),
            "remove" => WaitTarget::Activity(ActivityKind::Removal),
            "scrub" => WaitTarget::Activity(ActivityKind::Scrub),
            "trim" => WaitTarget::Activity(ActivityKind::Trim),
            "raidz_expand" => WaitTarget::Activity(ActivityKind::RaidzExpand),
            "discard" | "free" => WaitTarget::CheckpointDiscard,
            other => bail!("unknown wait activity: {other}"),
        };
        targets.push(target);
    }
    if targets.is_empty() {
        targets = ActivityKind::ALL.into_iter().map(WaitTarget::Activity).collect();
    }
    Ok(targets)
}

pub fn wait(pool_name: &str, targets: &[String], print_status: bool, poll_interval: Duration) -> Result<()> {
    let pool = registry::open(pool_name, &[])?;
    let targets = parse_wait_targets(targets)?;
    let wait_discard = targets.contains(&WaitTarget::CheckpointDiscard);
    let kinds: Vec<ActivityKind> = targets
        .iter()
        .filter_map(|t| match t {
            WaitTarget::Activity(k) => Some(*k),
            WaitTarget::CheckpointDiscard => None,
        })
        .collect();

    if wait_discard {
        while pool.checkpoint().state == pool_activity::checkpoint::CheckpointState::Discarding {
            std::thread::sleep(poll_interval.min(Duration::from_millis(20)));
        }
        if print_status {
            println!("  checkpoint discard: finished");
        }
    }

    if !kinds.is_empty() {
        let outcome = waiter::wait(
            &pool,
            &kinds,
            WaitOptions {
                poll_interval,
                print_status,
                deadline: None,
            },
            |pool| {
                for &kind in &kinds {
                    let record = pool.activity(kind);
                    println!(
                        "  {:?}: {:?} ({} bytes remaining)",
                        kind,
                        record.state,
                        waiter::bytes_remaining(kind, &record)
                    );
                }
            },
        )?;
        println!("{pool_name}: wait finished: {outcome:?}");
    } else {
        println!("{pool_name}: wait finished");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_and_free_map_to_checkpoint_discard() {
        let targets = parse_wait_targets(&["discard".into()]).unwrap();
        assert_eq!(targets, vec![WaitTarget::CheckpointDiscard]);
        let targets = parse_wait_targets(&["free".into()]).unwrap();
        assert_eq!(targets, vec![WaitTarget::CheckpointDiscard]);
    }

    #[test]
    fn empty_selector_list_waits_on_every_activity_kind() {
        let targets = parse_wait_targets(&[]).unwrap();
        assert_eq!(targets.len(), ActivityKind::ALL.len());
        assert!(targets
            .iter()
            .all(|t| matches!(t, WaitTarget::Activity(_))));
    }

    #[test]
    fn unknown_selector_is_rejected() {
        assert!(parse_wait_targets(&["bogus".into()]).is_err());
    }
}
