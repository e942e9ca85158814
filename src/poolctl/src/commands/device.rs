//! `attach`, `replace`, `detach`, `remove`, `online`, `offline`, `clear`,
//! `labelclear` (spec §6.1, §4.G).

use anyhow::Result;
use pool_activity::lifecycle::{
    self, AttachOptions, ClearOptions, OfflineOptions, OnlineOptions, RemoveOptions,
    ReplaceOptions, RewindPolicy,
};
use pool_activity::pool::PoolHandle;

use crate::registry;

#[allow(clippy::too_many_arguments)]
pub fn attach(
    pool: &str,
    existing_vdev: &str,
    new_device: &str,
    force: bool,
    sequential: bool,
    wait: bool,
    ashift: Option<u8>,
) -> Result<()> {
    let pool = registry::open(pool, &[existing_vdev])?;
    lifecycle::attach(
        &pool,
        existing_vdev,
        new_device,
        AttachOptions {
            force,
            sequential_rebuild: sequential,
            ashift,
            wait,
        },
    )?;
    println!(
        "{}: attach of {} to {} started",
        pool.name(),
        new_device,
        existing_vdev
    );
    Ok(())
}

pub fn replace(
    pool: &str,
    old_device: &str,
    new_device: &str,
    force: bool,
    sequential: bool,
    wait: bool,
) -> Result<()> {
    let pool = registry::open(pool, &[old_device])?;
    lifecycle::replace(
        &pool,
        old_device,
        new_device,
        ReplaceOptions {
            force,
            sequential_rebuild: sequential,
            wait,
        },
    )?;
    println!(
        "{}: replace of {} with {} started",
        pool.name(),
        old_device,
        new_device
    );
    Ok(())
}

pub fn detach(pool: &str, device: &str) -> Result<()> {
    let pool = registry::open(pool, &[device])?;
    lifecycle::detach(&pool, device)?;
    println!("{}: detached {}", pool.name(), device);
    Ok(())
}

pub fn remove(
    pool: &str,
    device: &str,
    noop_estimate: bool,
    parsable: bool,
    stop: bool,
    wait: bool,
) -> Result<()> {
    let _ = parsable;
    let pool = registry::open(pool, &[device])?;
    lifecycle::remove(
        &pool,
        device,
        RemoveOptions {
            noop_estimate,
            wait,
            stop,
        },
    )?;
    if stop {
        println!("{}: removal of {} cancelled", pool.name(), device);
    } else {
        println!("{}: removal of {} started", pool.name(), device);
    }
    Ok(())
}

pub fn online(pool: &str, device: &str, expand: bool, power_on: bool) -> Result<()> {
    let pool = registry::open(pool, &[device])?;
    lifecycle::online(&pool, device, OnlineOptions { expand, power_on })?;
    println!("{}: {} online", pool.name(), device);
    Ok(())
}

pub fn offline(pool: &str, device: &str, force: bool, temporary: bool) -> Result<()> {
    let pool = registry::open(pool, &[device])?;
    lifecycle::offline(&pool, device, OfflineOptions { force, temporary })?;
    println!("{}: {} offline", pool.name(), device);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn clear(
    pool: &str,
    device: Option<&str>,
    dry_rewind: bool,
    full_rewind: bool,
    extreme_rewind: bool,
    power_on: bool,
) -> Result<()> {
    let known: Vec<&str> = device.into_iter().collect();
    let pool = registry::open(pool, &known)?;
    // `-n`/`-X` alone stay NoRewind: lifecycle::clear_errors's own
    // validation is what turns that combination into an error demanding
    // `-F` (spec §4.G.clear_errors rewind ordering NO_REWIND < TRY_REWIND <
    // DO_REWIND).
    let rewind = if full_rewind {
        RewindPolicy::DoRewind
    } else {
        RewindPolicy::NoRewind
    };
    lifecycle::clear_errors(
        &pool,
        &known,
        ClearOptions {
            dry_rewind,
            rewind,
            extreme_rewind,
            power_on,
        },
    )?;
    println!("{}: errors cleared", pool.name());
    Ok(())
}

pub fn labelclear(device: &str, force: bool) -> Result<()> {
    // labelclear operates on a bare device path, not a named pool; use a
    // synthetic single-pool registry containing exactly that device.
    let pool = registry::open("labelclear", &[device])?;
    lifecycle::label_wipe(&pool, device, force)?;
    println!("{device}: label cleared");
    Ok(())
}
