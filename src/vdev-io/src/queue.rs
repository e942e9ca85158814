//! Queue worker and completion dispatcher (spec §4.C, §3 "Queue worker").
//!
//! Grounded on `devices/src/virtio/block/worker.rs::BlockWorker::work`: a
//! dedicated thread per queue, parked until signaled, draining and
//! dispatching requests in a loop until told to stop. The teacher's
//! `BlockWorker` services one virtio queue backed by a guest's
//! already-asynchronous virtio ring; a leaf vdev has no such ring; this
//! dispatcher folds the "driver executes the sub-batch" and "completion
//! dispatcher retires it" roles from spec §4.A/§4.C into one worker loop
//! per queue, so that submission (a channel send) stays non-blocking for
//! the issuer while the blocking syscall happens off the issuer's thread,
//! and so that per-queue completions are still retired in the order this
//! worker processes them (spec §5 "per-queue FIFO completion order").

use std::fs::File;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use nix::sys::uio::{pread, pwrite};
use tracing::{debug, error, warn};

use vdev_core::error::ErrorKind;
use vdev_core::zio::ZioKind;

use crate::checksum::VerifyGate;
use crate::vbio::{SubBatch, SECTOR_SIZE, VBio};

const MAX_COMPLETIONS_PER_DRAIN: usize = 32;

pub struct SubBatchJob {
    pub vbio: Arc<VBio>,
    pub index: usize,
}

/// N workers per device, spawned at open and terminated at close (spec §3
/// "Queue worker").
pub struct QueueWorker {
    id: usize,
    tx: Sender<SubBatchJob>,
    handle: Option<JoinHandle<()>>,
}

impl QueueWorker {
    pub fn spawn(id: usize, device_name: String, file: Arc<File>) -> Self {
        // A bounded channel stands in for the queue mutex guarding a fixed
        // ring of in-flight requests (spec §3 "mutex guarding the queue");
        // depth is generous since submission must not block on a full
        // queue under normal operation.
        let (tx, rx) = bounded::<SubBatchJob>(1024);
        let thread_name = format!("vdev-io/q{id}/{device_name}");
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                // Drains up to MAX_COMPLETIONS_PER_DRAIN before yielding
                // back to recv, matching spec §4.C's bounded drain loop.
                loop {
                    match rx.recv() {
                        Ok(job) => {
                            let mut batch = vec![job];
                            while batch.len() < MAX_COMPLETIONS_PER_DRAIN {
                                match rx.try_recv() {
                                    Ok(job) => batch.push(job),
                                    Err(_) => break,
                                }
                            }
                            for job in batch {
                                execute_and_dispatch(&file, job);
                            }
                        }
                        Err(_) => break, // channel closed: device is closing
                    }
                }
            })
            .expect("spawn queue worker thread");
        Self {
            id,
            tx,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Non-blocking enqueue (spec §4.A "the driver call is non-blocking").
    pub fn submit(&self, job: SubBatchJob) -> Result<(), ErrorKind> {
        self.tx
            .try_send(job)
            .map_err(|_| ErrorKind::Busy("queue full".into()))
    }

}

impl Drop for QueueWorker {
    /// Drops the sender first (closing the channel once the device's other
    /// senders are also gone), then joins so in-flight completions are
    /// drained before the worker exits (spec §5).
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn nix_err_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn execute_sub_batch(file: &File, kind: ZioKind, sub: &SubBatch) -> io::Result<()> {
    let offset = (sub.starting_sector * SECTOR_SIZE) as i64;
    match kind {
        ZioKind::Write => {
            let mut pos = offset;
            for page in &sub.pages {
                let bytes = page.snapshot();
                let n = pwrite(file, &bytes, pos).map_err(nix_err_to_io)?;
                pos += n as i64;
            }
            Ok(())
        }
        ZioKind::Read => {
            let mut pos = offset;
            for page in &sub.pages {
                let mut buf = vec![0u8; page.len];
                let n = pread(file, &mut buf, pos).map_err(nix_err_to_io)?;
                buf.truncate(n);
                page.write_from(&buf);
                pos += n as i64;
            }
            Ok(())
        }
        ZioKind::Flush | ZioKind::Trim => Ok(()),
    }
}

fn execute_and_dispatch(file: &File, job: SubBatchJob) {
    if job.vbio.zio_kind == ZioKind::Write {
        if let Some(ctx) = job.vbio.verify.lock().unwrap().take() {
            let result = VerifyGate::verify_before_submit(
                &ctx.original,
                ctx.issue_hash,
                &ctx.pool,
                &job.vbio.device_path,
                job.vbio.zio_offset,
                job.vbio.zio_size,
                &ctx.events,
            );
            if let Err(e) = result {
                warn!(path = %job.vbio.device_path.display(), "write failed checksum re-verification");
                job.vbio.record_error(e);
                if job.vbio.release() {
                    job.vbio.finish();
                }
                return;
            }
        }
    }

    let sub = &job.vbio.sub_batches[job.index];
    let result = execute_sub_batch(file, job.vbio.zio_kind, sub);

    match result {
        Ok(()) => {
            debug!(
                sub_batch = job.index,
                sector = sub.starting_sector,
                "sub-batch completed"
            );
        }
        Err(e) => {
            warn!(error = %e, sub_batch = job.index, "sub-batch failed");
            let kind = translate_io_error(&job.vbio.device_path, &e);
            job.vbio.record_error(kind);
        }
    }

    if job.vbio.release() {
        job.vbio.finish();
    }
}

/// Translates a raw I/O error into a client-visible error kind (spec §7
/// propagation policy: "the completion dispatcher translates a driver's
/// negative return into an error kind").
pub fn translate_io_error(device_path: &std::path::Path, e: &io::Error) -> ErrorKind {
    match e.raw_os_error() {
        Some(libc::EINVAL) => {
            error!(path = %device_path.display(), "EINVAL from driver: invariant violation");
            ErrorKind::invariant(format!("{}: EINVAL from driver", device_path.display()))
        }
        Some(libc::EOPNOTSUPP) => {
            ErrorKind::UnsupportedOperation(device_path.to_path_buf(), "not supported by device")
        }
        _ => ErrorKind::IoError(device_path.to_path_buf(), e.to_string()),
    }
}

/// Picks a queue uniformly at random for a freshly-issued zio (spec §4.A
/// "assigned to a queue chosen at random at issue time").
pub fn pick_queue(queues: &[QueueWorker]) -> usize {
    use rand::Rng;
    rand::thread_rng().gen_range(0..queues.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vdev_core::events::EventRing;
    use vdev_core::zio::{AbdBuffer, PageRef, Zio, ZioFlags};

    use crate::vbio::{self, VerifyContext};

    // Exercises execute_sub_batch directly against a tempfile rather than
    // through LeafDevice::open, since O_DIRECT requires a real block
    // device (or a filesystem that supports it) and most CI tmpfs mounts
    // reject it outright.
    fn backing_file(len: u64) -> std::fs::File {
        let f = tempfile::tempfile().unwrap();
        f.set_len(len).unwrap();
        f
    }

    #[test]
    fn write_then_read_round_trips() {
        let file = backing_file(4096);
        let write_sub = SubBatch {
            starting_sector: 2, // byte offset 1024
            sector_len: 1,
            pages: vec![PageRef::from_bytes(vec![0xABu8; SECTOR_SIZE as usize])],
        };
        execute_sub_batch(&file, ZioKind::Write, &write_sub).unwrap();

        let read_page = PageRef::from_bytes(vec![0u8; SECTOR_SIZE as usize]);
        let read_sub = SubBatch {
            starting_sector: 2,
            sector_len: 1,
            pages: vec![read_page.clone()],
        };
        execute_sub_batch(&file, ZioKind::Read, &read_sub).unwrap();
        assert_eq!(read_page.snapshot(), vec![0xABu8; SECTOR_SIZE as usize]);
    }

    #[test]
    fn flush_and_trim_are_no_ops_on_a_plain_file() {
        let file = backing_file(512);
        let sub = SubBatch {
            starting_sector: 0,
            sector_len: 0,
            pages: vec![],
        };
        execute_sub_batch(&file, ZioKind::Flush, &sub).unwrap();
        execute_sub_batch(&file, ZioKind::Trim, &sub).unwrap();
    }

    #[test]
    fn translate_io_error_classifies_eopnotsupp() {
        let err = io::Error::from_raw_os_error(libc::EOPNOTSUPP);
        let kind = translate_io_error(std::path::Path::new("/dev/sda1"), &err);
        assert!(matches!(kind, ErrorKind::UnsupportedOperation(_, _)));
    }

    #[test]
    fn translate_io_error_classifies_generic_failure_as_io_error() {
        let err = io::Error::from_raw_os_error(libc::EIO);
        let kind = translate_io_error(std::path::Path::new("/dev/sda1"), &err);
        assert!(matches!(kind, ErrorKind::IoError(_, _)));
    }

    #[test]
    #[should_panic(expected = "invariant violated")]
    fn translate_io_error_asserts_on_einval() {
        let err = io::Error::from_raw_os_error(libc::EINVAL);
        let _ = translate_io_error(std::path::Path::new("/dev/sda1"), &err);
    }

    fn write_vbio(device_bytes: Vec<u8>) -> Arc<VBio> {
        let buf = AbdBuffer::contiguous(device_bytes);
        let size = buf.len() as u64;
        let zio = Zio::new(
            ZioKind::Write,
            0,
            size,
            buf,
            ZioFlags::empty(),
            PathBuf::from("/dev/test0"),
            Box::new(|_| {}),
        );
        let vbio = vbio::build(zio, SECTOR_SIZE, 0).unwrap();
        vbio::arm_for_submit(&vbio);
        Arc::new(vbio)
    }

    // A mismatched VerifyContext simulates a write whose source buffer was
    // mutated after it was issued (spec §4.D): the dispatcher must catch it
    // right before the pwrite, not let it reach disk.
    #[test]
    fn dispatch_fails_write_on_verify_mismatch() {
        let file = backing_file(512);
        let vbio = write_vbio(vec![1u8; 512]);
        let events = Arc::new(EventRing::new());
        vbio::arm_verify(
            &vbio,
            VerifyContext {
                original: AbdBuffer::contiguous(vec![9u8; 512]),
                issue_hash: VerifyGate::issue_hash(&AbdBuffer::contiguous(vec![1u8; 512])),
                pool: "tank".into(),
                events: events.clone(),
            },
        );
        execute_and_dispatch(&file, SubBatchJob { vbio: vbio.clone(), index: 0 });
        assert_eq!(events.snapshot().len(), 1);
        assert!(matches!(
            vbio.take_error(),
            Some(ErrorKind::VerifyFailed(_, _, _))
        ));
    }

    #[test]
    fn dispatch_proceeds_when_verify_matches() {
        let file = backing_file(512);
        let vbio = write_vbio(vec![1u8; 512]);
        let events = Arc::new(EventRing::new());
        vbio::arm_verify(
            &vbio,
            VerifyContext {
                original: AbdBuffer::contiguous(vec![1u8; 512]),
                issue_hash: VerifyGate::issue_hash(&AbdBuffer::contiguous(vec![1u8; 512])),
                pool: "tank".into(),
                events: events.clone(),
            },
        );
        execute_and_dispatch(&file, SubBatchJob { vbio: vbio.clone(), index: 0 });
        assert_eq!(events.snapshot().len(), 0);
        assert!(vbio.take_error().is_none());
    }
}
