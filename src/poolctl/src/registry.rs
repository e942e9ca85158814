//! A tiny stand-in pool registry for a CLI that has no real on-disk pool
//! layer to open against (spec §1 Non-goals: on-disk format is out of
//! scope). Each invocation constructs a fresh
//! [`pool_activity::memory::MemoryPool`] seeded with a mirror topology
//! containing exactly the device paths the command names, so the usual
//! membership checks (`attach` against an existing vdev, `detach` against
//! a known leg, ...) have something real to validate against. State does
//! not persist across invocations — that is the expected limit of a
//! reference pool layer, not a bug in this CLI.

use anyhow::{bail, Result};
use pool_activity::memory::MemoryPool;
use pool_activity::pool::VdevNode;

pub fn open(pool_name: &str, known_devices: &[&str]) -> Result<MemoryPool> {
    if pool_name.is_empty() {
        bail!("pool name must not be empty");
    }
    let mut paths: Vec<&str> = known_devices.iter().copied().filter(|p| !p.is_empty()).collect();
    if paths.is_empty() {
        paths.push("/dev/disk0");
    }
    let children = paths
        .into_iter()
        .map(|path| VdevNode::Leaf {
            path: path.to_string(),
            healthy: true,
        })
        .collect();
    Ok(MemoryPool::new(pool_name, VdevNode::Mirror { children }))
}
