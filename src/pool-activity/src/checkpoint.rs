//! Checkpoint record (spec §3 "Checkpoint record", §4.E checkpoint-discard
//! row): `NONE ↔ EXISTS ↔ DISCARDING ↔ NONE`, one per pool.

use tracing::info;

use vdev_core::error::ErrorKind;
use vdev_core::events::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    None,
    Exists,
    Discarding,
}

#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub state: CheckpointState,
    pub start_time: Option<Timestamp>,
    pub space_consumed: u64,
}

impl Default for CheckpointRecord {
    fn default() -> Self {
        Self {
            state: CheckpointState::None,
            start_time: None,
            space_consumed: 0,
        }
    }
}

impl CheckpointRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the checkpoint. Only valid from `NONE` — a pool may hold at
    /// most one checkpoint at a time (spec §3).
    pub fn create(&mut self, space_consumed: u64) -> Result<(), ErrorKind> {
        if self.state != CheckpointState::None {
            return Err(ErrorKind::Busy("checkpoint already exists".into()));
        }
        self.state = CheckpointState::Exists;
        self.start_time = Some(Timestamp::now());
        self.space_consumed = space_consumed;
        info!(space_consumed, "checkpoint created");
        Ok(())
    }

    /// Begins discarding an existing checkpoint.
    pub fn discard(&mut self) -> Result<(), ErrorKind> {
        if self.state != CheckpointState::Exists {
            return Err(ErrorKind::NotActive("no checkpoint to discard".into()));
        }
        self.state = CheckpointState::Discarding;
        info!("checkpoint discard started");
        Ok(())
    }

    /// Completes a discard in progress, returning the record to `NONE`.
    pub fn finish_discard(&mut self) -> Result<(), ErrorKind> {
        if self.state != CheckpointState::Discarding {
            return Err(ErrorKind::NotActive("no discard in progress".into()));
        }
        *self = CheckpointRecord::default();
        info!("checkpoint discard finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut cp = CheckpointRecord::new();
        cp.create(1024).unwrap();
        assert_eq!(cp.state, CheckpointState::Exists);
        cp.discard().unwrap();
        assert_eq!(cp.state, CheckpointState::Discarding);
        cp.finish_discard().unwrap();
        assert_eq!(cp.state, CheckpointState::None);
    }

    #[test]
    fn discard_without_checkpoint_is_not_active() {
        let mut cp = CheckpointRecord::new();
        assert!(matches!(cp.discard(), Err(ErrorKind::NotActive(_))));
    }

    #[test]
    fn double_create_is_busy() {
        let mut cp = CheckpointRecord::new();
        cp.create(0).unwrap();
        assert!(matches!(cp.create(0), Err(ErrorKind::Busy(_))));
    }
}
