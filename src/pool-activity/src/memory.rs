//! In-memory reference implementation of [`PoolHandle`] (spec §6.2,
//! SPEC_FULL §6.2): stands in for the on-disk-format-aware pool layer that
//! is explicitly out of scope for this core, so tests and `poolctl` have a
//! real collaborator to drive instead of a trait with no implementation.

use std::collections::HashMap;

use parking_lot::RwLock;

use vdev_core::error::ErrorKind;

use crate::activity::{ActivityCommand, ActivityKind, ActivityRecord};
use crate::checkpoint::CheckpointRecord;
use crate::pool::{MembershipState, PoolHandle, RefreshResult, VdevNode};

struct State {
    faulted: bool,
    missing: bool,
    topology: VdevNode,
    activities: HashMap<ActivityKind, ActivityRecord>,
    checkpoint: CheckpointRecord,
    /// Leaves absent from this map are `Active` (spec §4.G.label_wipe);
    /// tests and `poolctl`'s registry set the other states explicitly.
    membership: HashMap<String, MembershipState>,
}

pub struct MemoryPool {
    name: String,
    state: RwLock<State>,
}

impl MemoryPool {
    pub fn new(name: impl Into<String>, topology: VdevNode) -> Self {
        let activities = ActivityKind::ALL
            .iter()
            .map(|&k| (k, ActivityRecord::new(k)))
            .collect();
        Self {
            name: name.into(),
            state: RwLock::new(State {
                faulted: false,
                missing: false,
                topology,
                activities,
                checkpoint: CheckpointRecord::new(),
                membership: HashMap::new(),
            }),
        }
    }

    pub fn set_faulted(&self, faulted: bool) {
        self.state.write().faulted = faulted;
    }

    pub fn set_membership(&self, path: impl Into<String>, state: MembershipState) {
        self.state.write().membership.insert(path.into(), state);
    }

    pub fn set_missing(&self, missing: bool) {
        self.state.write().missing = missing;
    }

    /// Test/worker-simulation hook: bump an activity's progress counters
    /// outside the command protocol, the way a real scan thread would.
    pub fn add_progress(&self, kind: ActivityKind, examined: u64, issued: u64, repaired: u64) {
        if let Some(rec) = self.state.write().activities.get_mut(&kind) {
            rec.add_progress(examined, issued, repaired);
        }
    }

    pub fn set_to_examine(&self, kind: ActivityKind, bytes: u64) {
        if let Some(rec) = self.state.write().activities.get_mut(&kind) {
            rec.to_examine = bytes;
        }
    }

    pub fn finish_activity(&self, kind: ActivityKind) {
        if let Some(rec) = self.state.write().activities.get_mut(&kind) {
            rec.finish();
        }
    }
}

impl PoolHandle for MemoryPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_faulted(&self) -> bool {
        self.state.read().faulted
    }

    fn refresh_stats(&self) -> RefreshResult {
        let state = self.state.read();
        RefreshResult {
            missing: state.missing,
            error: None,
        }
    }

    fn config(&self) -> VdevNode {
        self.state.read().topology.clone()
    }

    fn activity(&self, kind: ActivityKind) -> ActivityRecord {
        self.state.read().activities[&kind].clone()
    }

    fn checkpoint(&self) -> CheckpointRecord {
        self.state.read().checkpoint.clone()
    }

    fn trigger(&self, kind: ActivityKind, command: ActivityCommand) -> Result<(), ErrorKind> {
        let mut state = self.state.write();
        if state.faulted && command == ActivityCommand::Start {
            return Err(ErrorKind::Busy("pool unavailable".into()));
        }
        // Scrub and error-scrub are mutually exclusive per pool (spec
        // §4.E policy).
        if command == ActivityCommand::Start {
            let other = match kind {
                ActivityKind::Scrub => Some(ActivityKind::ErrorScrub),
                ActivityKind::ErrorScrub => Some(ActivityKind::Scrub),
                _ => None,
            };
            if let Some(other) = other {
                if state.activities[&other].state == crate::activity::ActivityState::Scanning {
                    return Err(ErrorKind::Busy(
                        "scrub and error-scrub are mutually exclusive".into(),
                    ));
                }
            }
        }
        state
            .activities
            .get_mut(&kind)
            .expect("all ActivityKind variants are seeded")
            .apply(command)
    }

    fn discard_checkpoint(&self) -> Result<(), ErrorKind> {
        self.state.write().checkpoint.discard()
    }

    fn create_checkpoint(&self, space_consumed: u64) -> Result<(), ErrorKind> {
        self.state.write().checkpoint.create(space_consumed)
    }

    fn attach_leaf(&self, existing: &str, new_path: &str) -> Result<(), ErrorKind> {
        let state = self.state.read();
        if state.topology.find_leaf(existing).is_none() {
            return Err(ErrorKind::NotPresent(existing.into()));
        }
        drop(state);
        // A real pool layer would graft `new_path` as a sibling of
        // `existing` in the topology tree; that mutation is out of scope
        // here (§1 Non-goals: on-disk format). What the core is
        // responsible for — scheduling the resulting resilver — happens in
        // `lifecycle::attach`.
        let _ = new_path;
        Ok(())
    }

    fn replace_leaf(&self, old: &str, new_path: &str) -> Result<(), ErrorKind> {
        self.attach_leaf(old, new_path)
    }

    fn detach_leaf(&self, path: &str) -> Result<(), ErrorKind> {
        let state = self.state.read();
        if state.topology.find_leaf(path).is_none() {
            return Err(ErrorKind::NotPresent(path.into()));
        }
        Ok(())
    }

    fn mark_for_removal(&self, path: &str) -> Result<(), ErrorKind> {
        self.detach_leaf(path)
    }

    fn set_leaf_online(&self, path: &str, online: bool) -> Result<(), ErrorKind> {
        let mut state = self.state.write();
        let mut found = false;
        set_leaf_health(&mut state.topology, path, online, &mut found);
        if found {
            Ok(())
        } else {
            Err(ErrorKind::NotPresent(path.into()))
        }
    }

    fn clear_leaf_errors(&self, path: &str) -> Result<(), ErrorKind> {
        self.set_leaf_online(path, true)
    }

    fn label_wipe(&self, path: &str, _force: bool) -> Result<(), ErrorKind> {
        let state = self.state.read();
        if state.topology.find_leaf(path).is_none() {
            return Err(ErrorKind::NotPresent(path.into()));
        }
        Ok(())
    }

    fn leaf_membership(&self, path: &str) -> Result<MembershipState, ErrorKind> {
        let state = self.state.read();
        if state.topology.find_leaf(path).is_none() {
            return Err(ErrorKind::NotPresent(path.into()));
        }
        Ok(state
            .membership
            .get(path)
            .copied()
            .unwrap_or(MembershipState::Active))
    }
}

fn set_leaf_health(node: &mut VdevNode, path: &str, healthy: bool, found: &mut bool) {
    match node {
        VdevNode::Leaf { path: p, healthy: h } => {
            if p == path {
                *h = healthy;
                *found = true;
            }
        }
        VdevNode::Mirror { children } | VdevNode::Raidz { children } => {
            for child in children {
                set_leaf_health(child, path, healthy, found);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> MemoryPool {
        MemoryPool::new(
            "tank",
            VdevNode::Mirror {
                children: vec![
                    VdevNode::Leaf {
                        path: "/dev/sda1".into(),
                        healthy: true,
                    },
                    VdevNode::Leaf {
                        path: "/dev/sdb1".into(),
                        healthy: true,
                    },
                ],
            },
        )
    }

    #[test]
    fn faulted_pool_refuses_start() {
        let p = pool();
        p.set_faulted(true);
        let err = p
            .trigger(ActivityKind::Scrub, ActivityCommand::Start)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::Busy(_)));
    }

    #[test]
    fn scrub_and_error_scrub_are_mutually_exclusive() {
        let p = pool();
        p.trigger(ActivityKind::Scrub, ActivityCommand::Start).unwrap();
        let err = p
            .trigger(ActivityKind::ErrorScrub, ActivityCommand::Start)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::Busy(_)));
    }

    #[test]
    fn attach_to_missing_leaf_is_not_present() {
        let p = pool();
        let err = p.attach_leaf("/dev/nonexistent", "/dev/sdc1").unwrap_err();
        assert!(matches!(err, ErrorKind::NotPresent(_)));
    }

    #[test]
    fn set_leaf_online_updates_topology() {
        let p = pool();
        p.set_leaf_online("/dev/sda1", false).unwrap();
        let mut seen = false;
        p.config().for_each_leaf(&mut |path, healthy| {
            if path == "/dev/sda1" {
                seen = true;
                assert!(!healthy);
            }
        });
        assert!(seen);
    }
}
