//! `events [--clear]` (SPEC_FULL §6.1 expansion over §6.3): a thin CLI
//! wrapper over the library-level [`vdev_core::events::EventRing`].

use anyhow::Result;
use vdev_core::events::EventRing;

/// The CLI-process-wide event ring. A real deployment's ring lives inside
/// the running driver process this CLI administers; lacking one (this core
/// has no persistent daemon — §1 Non-goals), `poolctl events` reads from a
/// ring scoped to this invocation, which is always empty unless something
/// in-process pushed to it first.
static EVENTS: std::sync::OnceLock<EventRing> = std::sync::OnceLock::new();

fn ring() -> &'static EventRing {
    EVENTS.get_or_init(EventRing::new)
}

pub fn events(clear: bool) -> Result<()> {
    let ring = ring();
    if clear {
        let n = ring.clear();
        println!("cleared {n} event(s)");
        return Ok(());
    }
    let snapshot = ring.snapshot();
    if snapshot.is_empty() {
        println!("no events");
        return Ok(());
    }
    for event in snapshot {
        println!("{}: {:?}", event.class(), event);
    }
    Ok(())
}
