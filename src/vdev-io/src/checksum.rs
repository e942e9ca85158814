//! Checksum-verify gate (spec §4.D): writes only. Computes a content hash
//! at issue time and, on a configurable 1-in-N schedule, recomputes it
//! immediately before the sub-batch is handed to the driver, detecting a
//! concurrently-mutated source buffer before it becomes authoritative on
//! disk.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use vdev_core::error::ErrorKind;
use vdev_core::events::{Event, EventRing};
use vdev_core::hash::Hash256;
use vdev_core::zio::AbdBuffer;

/// Per-device write counter driving the `counter % N == 0` sampling
/// schedule (spec §3 "Checksum-verify counter").
#[derive(Default)]
pub struct VerifyGate {
    write_counter: AtomicU64,
}

impl VerifyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the issue-time hash. Called immediately before a write is
    /// enqueued (spec §4.D "On issue...").
    pub fn issue_hash(buffer: &AbdBuffer) -> Hash256 {
        Hash256::of(&buffer.to_contiguous())
    }

    /// True iff this write falls on the 1-in-N verify schedule.
    pub fn should_verify(&self, n: u32) -> bool {
        let n = n.max(1) as u64;
        let count = self.write_counter.fetch_add(1, Ordering::Relaxed) + 1;
        count % n == 0
    }

    /// Recomputes the hash from the same source buffer immediately before
    /// the driver issues the write syscall, comparing against `issue_hash`.
    /// On mismatch, emits a `DIO_VERIFY` event and returns `VerifyFailed`
    /// instead of letting the write proceed (spec §4.D). Takes no `&self`:
    /// by the time this runs the write has already been admitted onto the
    /// schedule by `should_verify`, so there is no counter state left to
    /// consult — the queue worker that is about to issue the `pwrite` is
    /// the caller, not the device that decided to sample this write.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_before_submit(
        buffer: &AbdBuffer,
        issue_hash: Hash256,
        pool: &str,
        device_path: &Path,
        offset: u64,
        size: u64,
        events: &EventRing,
    ) -> Result<(), ErrorKind> {
        let verify_hash = Hash256::of(&buffer.to_contiguous());
        if verify_hash == issue_hash {
            return Ok(());
        }
        events.push(Event::dio_verify(
            pool,
            device_path.display().to_string(),
            offset,
            size,
            issue_hash,
            verify_hash,
        ));
        Err(ErrorKind::VerifyFailed(device_path.to_path_buf(), offset, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_schedule_fires_every_nth_write() {
        let gate = VerifyGate::new();
        let fired: Vec<bool> = (0..6).map(|_| gate.should_verify(3)).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn n_of_one_verifies_every_write() {
        let gate = VerifyGate::new();
        for _ in 0..5 {
            assert!(gate.should_verify(1));
        }
    }

    #[test]
    fn matching_hash_passes_verification() {
        let events = EventRing::new();
        let buf = AbdBuffer::contiguous(vec![1, 2, 3, 4]);
        let hash = VerifyGate::issue_hash(&buf);
        let result = VerifyGate::verify_before_submit(
            &buf,
            hash,
            "tank",
            Path::new("/dev/sda1"),
            0,
            4,
            &events,
        );
        assert!(result.is_ok());
        assert_eq!(events.snapshot().len(), 0);
    }

    #[test]
    fn mutated_buffer_fails_verification_and_emits_event() {
        let events = EventRing::new();
        let original = AbdBuffer::contiguous(vec![1, 2, 3, 4]);
        let hash = VerifyGate::issue_hash(&original);
        let mutated = AbdBuffer::contiguous(vec![9, 9, 9, 9]);
        let result = VerifyGate::verify_before_submit(
            &mutated,
            hash,
            "tank",
            Path::new("/dev/sda1"),
            0,
            4,
            &events,
        );
        assert!(matches!(result, Err(ErrorKind::VerifyFailed(_, 0, 4))));
        assert_eq!(events.snapshot().len(), 1);
    }
}
