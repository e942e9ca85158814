//! Device lifecycle operations exposed to the pool layer (spec §4.G): each
//! validates against the pool's topology and current activity state, then
//! drives the pool handle. None of these throw; every outcome is an
//! `ErrorKind`.

use tracing::info;

use vdev_core::error::ErrorKind;

use crate::activity::{ActivityCommand, ActivityKind};
use crate::pool::{MembershipState, PoolHandle, VdevParentKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct AttachOptions {
    pub force: bool,
    pub sequential_rebuild: bool,
    pub ashift: Option<u8>,
    pub wait: bool,
}

/// Extends a mirror leg or triggers a raidz-expand (spec §4.G.attach).
/// Which one happens depends on `existing_vdev`'s parent in the pool's
/// topology: a mirror leg gets an initial DTL of `[0, now]`, which is
/// exactly the condition under which §4.E schedules a resilver, so attach
/// starts one unconditionally for the mirror case; a raidz top-level has no
/// DTL concept and instead begins a raidz-expand.
pub fn attach(
    pool: &dyn PoolHandle,
    existing_vdev: &str,
    new_device: &str,
    opts: AttachOptions,
) -> Result<(), ErrorKind> {
    if pool.is_faulted() && !opts.force {
        return Err(ErrorKind::Busy(format!("{}: pool unavailable", pool.name())));
    }
    let _ = opts.ashift; // only `ashift=` is accepted (spec §9); no allocator to apply it to here
    let parent_kind = pool
        .config()
        .parent_kind_of(existing_vdev)
        .ok_or_else(|| ErrorKind::NotPresent(existing_vdev.into()))?;
    pool.attach_leaf(existing_vdev, new_device)?;
    let kind = match parent_kind {
        VdevParentKind::Raidz => ActivityKind::RaidzExpand,
        VdevParentKind::Mirror => {
            if opts.sequential_rebuild {
                ActivityKind::Rebuild
            } else {
                ActivityKind::Resilver
            }
        }
    };
    pool.trigger(kind, ActivityCommand::Start)?;
    info!(pool = pool.name(), existing_vdev, new_device, ?kind, "device attached");
    if opts.wait {
        super::waiter::wait(pool, &[kind], super::waiter::WaitOptions::default(), |_| {})?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceOptions {
    pub force: bool,
    pub sequential_rebuild: bool,
    pub wait: bool,
}

/// Atomic attach-and-mark-old-for-removal (spec §4.G.replace).
pub fn replace(
    pool: &dyn PoolHandle,
    old_device: &str,
    new_device: &str,
    opts: ReplaceOptions,
) -> Result<(), ErrorKind> {
    if pool.is_faulted() && !opts.force {
        return Err(ErrorKind::Busy(format!("{}: pool unavailable", pool.name())));
    }
    pool.replace_leaf(old_device, new_device)?;
    let kind = if opts.sequential_rebuild {
        ActivityKind::Rebuild
    } else {
        ActivityKind::Resilver
    };
    pool.trigger(kind, ActivityCommand::Start)?;
    info!(pool = pool.name(), old_device, new_device, ?kind, "device replaced");
    if opts.wait {
        super::waiter::wait(pool, &[kind], super::waiter::WaitOptions::default(), |_| {})?;
    }
    Ok(())
}

/// Only valid for a mirror leg that is not the last healthy one (spec
/// §4.G.detach). The topology's redundancy accounting lives in the
/// out-of-scope pool layer; this core only forwards the request.
pub fn detach(pool: &dyn PoolHandle, device: &str) -> Result<(), ErrorKind> {
    pool.detach_leaf(device)?;
    info!(pool = pool.name(), device, "device detached");
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub noop_estimate: bool,
    pub wait: bool,
    pub stop: bool,
}

/// Top-level device removal (spec §4.G.remove). `stop` cancels an
/// in-progress removal instead of starting a new one.
pub fn remove(
    pool: &dyn PoolHandle,
    device: &str,
    opts: RemoveOptions,
) -> Result<(), ErrorKind> {
    if opts.stop {
        return pool.trigger(ActivityKind::Removal, ActivityCommand::Cancel);
    }
    if opts.noop_estimate {
        // Reports the memory required to retain indirect mappings without
        // performing the removal; this core has no allocator to consult
        // (§1 Non-goals), so the estimate is the caller's responsibility —
        // only the validation step runs here.
        return pool.detach_leaf(device).map(|_| ());
    }
    pool.mark_for_removal(device)?;
    pool.trigger(ActivityKind::Removal, ActivityCommand::Start)?;
    info!(pool = pool.name(), device, "device removal started");
    if opts.wait {
        super::waiter::wait(
            pool,
            &[ActivityKind::Removal],
            super::waiter::WaitOptions::default(),
            |_| {},
        )?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineOptions {
    pub expand: bool,
    pub power_on: bool,
}

/// Spec §4.G.online. Powering the enclosure slot and waiting for the
/// device node to reappear is an out-of-scope hardware interaction; this
/// core performs only the logical online transition.
pub fn online(pool: &dyn PoolHandle, device: &str, opts: OnlineOptions) -> Result<(), ErrorKind> {
    pool.set_leaf_online(device, true)?;
    info!(pool = pool.name(), device, "device online");
    if opts.expand {
        pool.trigger(ActivityKind::RaidzExpand, ActivityCommand::Start).ok();
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineOptions {
    pub force: bool,
    pub temporary: bool,
}

pub fn offline(pool: &dyn PoolHandle, device: &str, opts: OfflineOptions) -> Result<(), ErrorKind> {
    let _ = opts.temporary;
    if pool.is_faulted() && !opts.force {
        return Err(ErrorKind::Busy(format!("{}: pool unavailable", pool.name())));
    }
    pool.set_leaf_online(device, false)?;
    info!(pool = pool.name(), device, "device offline");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindPolicy {
    NoRewind,
    TryRewind,
    DoRewind,
}

#[derive(Debug, Clone, Copy)]
pub struct ClearOptions {
    pub dry_rewind: bool,
    pub rewind: RewindPolicy,
    pub extreme_rewind: bool,
    pub power_on: bool,
}

impl Default for ClearOptions {
    fn default() -> Self {
        Self {
            dry_rewind: false,
            rewind: RewindPolicy::NoRewind,
            extreme_rewind: false,
            power_on: false,
        }
    }
}

/// Spec §4.G.clear_errors: rewind policy is ordered
/// `NO_REWIND < TRY_REWIND < DO_REWIND`; `EXTREME_REWIND` composes with
/// `DO_REWIND` or `TRY_REWIND`; `-n`/`-X` require `-F`.
pub fn clear_errors(
    pool: &dyn PoolHandle,
    devices: &[&str],
    opts: ClearOptions,
) -> Result<(), ErrorKind> {
    if (opts.dry_rewind || opts.extreme_rewind) && opts.rewind == RewindPolicy::NoRewind {
        return Err(ErrorKind::InvalidArgument(
            "-n/-X require a rewind policy of at least -F".into(),
        ));
    }
    if devices.is_empty() {
        return Err(ErrorKind::NotPresent("<no device specified>".into()));
    }
    for device in devices {
        pool.clear_leaf_errors(device)?;
    }
    info!(pool = pool.name(), ?devices, "device errors cleared");
    Ok(())
}

/// Spec §4.G.label_wipe: refuses a member that isn't `DESTROYED` unless
/// `force` is set (an exported, potentially-active, active, spare or
/// l2cache leaf is all still "in use" from this pool's point of view).
pub fn label_wipe(pool: &dyn PoolHandle, device: &str, force: bool) -> Result<(), ErrorKind> {
    let membership = pool.leaf_membership(device)?;
    if membership != MembershipState::Destroyed && !force {
        return Err(ErrorKind::Busy(format!(
            "{}: {device} is part of a pool; use '-f' to override",
            pool.name()
        )));
    }
    pool.label_wipe(device, force)?;
    info!(pool = pool.name(), device, force, "label wiped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPool;
    use crate::pool::VdevNode;

    fn pool() -> MemoryPool {
        MemoryPool::new(
            "tank",
            VdevNode::Mirror {
                children: vec![VdevNode::Leaf {
                    path: "/dev/sda1".into(),
                    healthy: true,
                }],
            },
        )
    }

    #[test]
    fn attach_schedules_resilver() {
        let pool = pool();
        attach(&pool, "/dev/sda1", "/dev/sdb1", AttachOptions::default()).unwrap();
        assert_eq!(
            pool.activity(ActivityKind::Resilver).state,
            crate::activity::ActivityState::Scanning
        );
    }

    #[test]
    fn attach_to_raidz_leg_schedules_raidz_expand() {
        let pool = MemoryPool::new(
            "tank",
            VdevNode::Raidz {
                children: vec![
                    VdevNode::Leaf { path: "/dev/sda1".into(), healthy: true },
                    VdevNode::Leaf { path: "/dev/sdb1".into(), healthy: true },
                ],
            },
        );
        attach(&pool, "/dev/sda1", "/dev/sdc1", AttachOptions::default()).unwrap();
        assert_eq!(
            pool.activity(ActivityKind::RaidzExpand).state,
            crate::activity::ActivityState::Scanning
        );
    }

    #[test]
    fn attach_to_unknown_vdev_is_not_present() {
        let pool = pool();
        let err = attach(&pool, "/dev/nonexistent", "/dev/sdb1", AttachOptions::default())
            .unwrap_err();
        assert!(matches!(err, ErrorKind::NotPresent(_)));
    }

    #[test]
    fn label_wipe_active_member_requires_force() {
        let pool = pool();
        let err = label_wipe(&pool, "/dev/sda1", false).unwrap_err();
        assert!(matches!(err, ErrorKind::Busy(_)));
        label_wipe(&pool, "/dev/sda1", true).unwrap();
    }

    #[test]
    fn label_wipe_destroyed_member_needs_no_force() {
        let pool = pool();
        pool.set_membership("/dev/sda1", crate::pool::MembershipState::Destroyed);
        label_wipe(&pool, "/dev/sda1", false).unwrap();
    }

    #[test]
    fn clear_rejects_dry_rewind_without_force() {
        let pool = pool();
        let err = clear_errors(
            &pool,
            &["/dev/sda1"],
            ClearOptions {
                dry_rewind: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn offline_faulted_pool_requires_force() {
        let pool = pool();
        pool.set_faulted(true);
        let err = offline(&pool, "/dev/sda1", OfflineOptions::default()).unwrap_err();
        assert!(matches!(err, ErrorKind::Busy(_)));
        offline(
            &pool,
            "/dev/sda1",
            OfflineOptions {
                force: true,
                temporary: false,
            },
        )
        .unwrap();
    }
}
