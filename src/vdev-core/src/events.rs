//! The event surface: an unbounded in-memory ring, written by
//! the checksum-verify gate and the completion dispatcher, read back in
//! timestamp order by CLI consumers.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::hash::Hash256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `ereport.fs.zfs.dio_verify`
    DioVerify {
        timestamp: Timestamp,
        pool: String,
        vdev_path: String,
        offset: u64,
        size: u64,
        expected_hash: String,
        computed_hash: String,
        /// Always 0: a verify mismatch carries no separate errno, the
        /// hash disagreement is the whole report (spec §6.3 DIO_VERIFY
        /// field list).
        error: i32,
    },
    /// `ereport.fs.zfs.io`
    IoError {
        timestamp: Timestamp,
        pool: String,
        vdev_path: String,
        vdev_state: String,
        aux_code: i32,
    },
}

impl Event {
    pub fn dio_verify(
        pool: impl Into<String>,
        vdev_path: impl Into<String>,
        offset: u64,
        size: u64,
        expected: Hash256,
        computed: Hash256,
    ) -> Self {
        Event::DioVerify {
            timestamp: Timestamp::now(),
            pool: pool.into(),
            vdev_path: vdev_path.into(),
            offset,
            size,
            expected_hash: expected.to_string(),
            computed_hash: computed.to_string(),
            error: 0,
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Event::DioVerify { .. } => "ereport.fs.zfs.dio_verify",
            Event::IoError { .. } => "ereport.fs.zfs.io",
        }
    }
}

/// An unbounded, append-only ring of events, drained and cleared by
/// consumers. "Ring" here names the read/clear contract, not a
/// fixed-capacity circular buffer — it never drops old entries on its own.
#[derive(Default)]
pub struct EventRing {
    events: Mutex<Vec<Event>>,
}

impl EventRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    /// Snapshot all events in timestamp (insertion) order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Empty the ring, returning the number of records cleared.
    pub fn clear(&self) -> usize {
        let mut events = self.events.lock();
        let n = events.len();
        events.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_reports_count_and_empties() {
        let ring = EventRing::new();
        ring.push(Event::dio_verify(
            "tank",
            "/dev/sda1",
            0,
            4096,
            Hash256::of(b"a"),
            Hash256::of(b"b"),
        ));
        ring.push(Event::IoError {
            timestamp: Timestamp::now(),
            pool: "tank".into(),
            vdev_path: "/dev/sda1".into(),
            vdev_state: "DEGRADED".into(),
            aux_code: 5,
        });
        assert_eq!(ring.snapshot().len(), 2);
        assert_eq!(ring.clear(), 2);
        assert_eq!(ring.snapshot().len(), 0);
    }
}
