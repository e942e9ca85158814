//! The pool-handle interface the core imports from the (out-of-scope)
//! on-disk-format-aware pool layer (spec §6.2).

use vdev_core::error::ErrorKind;

use crate::activity::{ActivityCommand, ActivityKind, ActivityRecord};
use crate::checkpoint::CheckpointRecord;

#[derive(Debug, Clone)]
pub enum VdevNode {
    Leaf { path: String, healthy: bool },
    Mirror { children: Vec<VdevNode> },
    Raidz { children: Vec<VdevNode> },
}

impl VdevNode {
    pub fn for_each<'a>(&'a self, f: &mut dyn FnMut(&'a VdevNode)) {
        f(self);
        match self {
            VdevNode::Leaf { .. } => {}
            VdevNode::Mirror { children } | VdevNode::Raidz { children } => {
                for child in children {
                    child.for_each(f);
                }
            }
        }
    }

    pub fn for_each_leaf<'a>(&'a self, f: &mut dyn FnMut(&'a str, bool)) {
        self.for_each(&mut |node| {
            if let VdevNode::Leaf { path, healthy } = node {
                f(path, *healthy);
            }
        });
    }

    pub fn find_leaf(&self, path: &str) -> Option<&VdevNode> {
        let mut found = None;
        self.for_each(&mut |node| {
            if let VdevNode::Leaf { path: p, .. } = node {
                if p == path {
                    found = Some(node);
                }
            }
        });
        found
    }

    /// The kind of `leaf_path`'s immediate parent, if any (spec §4.G.attach:
    /// attaching a new leg to a mirror schedules a resilver; attaching one
    /// to a raidz top-level is a raidz-expand instead).
    pub fn parent_kind_of(&self, leaf_path: &str) -> Option<VdevParentKind> {
        match self {
            VdevNode::Leaf { .. } => None,
            VdevNode::Mirror { children } => {
                if is_direct_child(children, leaf_path) {
                    return Some(VdevParentKind::Mirror);
                }
                children.iter().find_map(|c| c.parent_kind_of(leaf_path))
            }
            VdevNode::Raidz { children } => {
                if is_direct_child(children, leaf_path) {
                    return Some(VdevParentKind::Raidz);
                }
                children.iter().find_map(|c| c.parent_kind_of(leaf_path))
            }
        }
    }
}

fn is_direct_child(children: &[VdevNode], leaf_path: &str) -> bool {
    children
        .iter()
        .any(|c| matches!(c, VdevNode::Leaf { path, .. } if path == leaf_path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdevParentKind {
    Mirror,
    Raidz,
}

/// Where a leaf's label currently places it, gating `label_wipe` (spec
/// §4.G.label_wipe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Active,
    Spare,
    L2Cache,
    Exported,
    PotentiallyActive,
    Destroyed,
}

/// Outcome of `refresh_stats` (spec §6.2 "`refresh_stats(handle) →
/// (missing, error)`").
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub missing: bool,
    pub error: Option<ErrorKind>,
}

/// The core's view of a pool, supplied by the (unimplemented, out-of-scope)
/// on-disk-format-aware pool layer. `pool_activity::memory::MemoryPool` is
/// the in-memory reference implementation used by tests and by `poolctl`.
pub trait PoolHandle: Send + Sync {
    fn name(&self) -> &str;

    /// True once the pool has no more redundancy to give and administrative
    /// activity starts must be refused (spec §4.E "Faulted pools refuse
    /// all activity starts with a 'pool unavailable' error").
    fn is_faulted(&self) -> bool;

    fn refresh_stats(&self) -> RefreshResult;

    fn config(&self) -> VdevNode;

    fn activity(&self, kind: ActivityKind) -> ActivityRecord;

    fn checkpoint(&self) -> CheckpointRecord;

    /// The activity-control entry point (spec §6.2 "trigger(handle,
    /// {kind, command, params})"). `params` is folded into the specific
    /// commands `lifecycle.rs` issues rather than passed generically, since
    /// this core only ever drives a fixed, known set of transitions.
    fn trigger(&self, kind: ActivityKind, command: ActivityCommand) -> Result<(), ErrorKind>;

    fn discard_checkpoint(&self) -> Result<(), ErrorKind>;
    fn create_checkpoint(&self, space_consumed: u64) -> Result<(), ErrorKind>;

    fn attach_leaf(&self, existing: &str, new_path: &str) -> Result<(), ErrorKind>;
    fn replace_leaf(&self, old: &str, new_path: &str) -> Result<(), ErrorKind>;
    fn detach_leaf(&self, path: &str) -> Result<(), ErrorKind>;
    fn mark_for_removal(&self, path: &str) -> Result<(), ErrorKind>;
    fn set_leaf_online(&self, path: &str, online: bool) -> Result<(), ErrorKind>;
    fn clear_leaf_errors(&self, path: &str) -> Result<(), ErrorKind>;
    fn label_wipe(&self, path: &str, force: bool) -> Result<(), ErrorKind>;

    /// The membership state gating `label_wipe` (spec §4.G.label_wipe).
    fn leaf_membership(&self, path: &str) -> Result<MembershipState, ErrorKind>;
}
