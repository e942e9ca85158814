//! Leaf device open/close/reopen state machine (spec §4.A, §3 "Leaf
//! device").
//!
//! Grounded on `vinit/src/blockdev.rs`'s block-device-ioctl-on-a-`File`
//! shape (open a path, probe it through raw ioctls, surface a plain
//! `Result`) combined with the teacher's habit of guarding a device's
//! open/closed lifecycle behind one `RwLock` rather than scattering
//! booleans (`libkrun/src/machine.rs`'s `Vmm` handle); adapted here to a
//! `RwLock<DeviceState>` guarding geometry plus a fixed set of queue
//! workers spawned at open and torn down at close.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use vdev_core::error::ErrorKind;
use vdev_core::events::EventRing;
use vdev_core::tunables::Tunables;
use vdev_core::zio::{ZioKind, Zio};

use crate::checksum::VerifyGate;
use crate::geometry::{self, Geometry};
use crate::queue::{pick_queue, QueueWorker, SubBatchJob};
use crate::vbio::{self, VBio};

/// Linux kernel-internal restart errno, not exposed by the `libc` crate.
const ERESTARTSYS: i32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Opening,
    Open,
    Closing,
}

struct OpenState {
    file: Arc<File>,
    geometry: Geometry,
    queues: Vec<QueueWorker>,
    flush_supported: AtomicBool,
}

/// A leaf vdev (spec §3 "Leaf device"). One instance per block device path;
/// `open`/`close`/`reopen` serialize through `lock`, matching the spec's
/// "a single writer lock serializes open/close/reopen" requirement.
pub struct LeafDevice {
    path: PathBuf,
    state: RwLock<DeviceState>,
    open: RwLock<Option<OpenState>>,
    verify_gate: VerifyGate,
    removed: AtomicBool,
    events: Arc<EventRing>,
    pool_name: String,
}

impl std::fmt::Debug for LeafDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafDevice")
            .field("path", &self.path)
            .field("pool_name", &self.pool_name)
            .finish_non_exhaustive()
    }
}

const MAX_THREADS: usize = 8;

impl LeafDevice {
    /// Construct an unopened device bound to `path`. Rejects non-absolute
    /// paths (spec §4.A "refuse non-absolute paths with 'bad label'").
    /// `events` is the owning pool's shared event ring (spec §4.H); verify
    /// failures and I/O errors observed on this device are pushed there.
    pub fn new(
        path: impl Into<PathBuf>,
        pool_name: impl Into<String>,
        events: Arc<EventRing>,
    ) -> Result<Self, ErrorKind> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(ErrorKind::BadLabel(path));
        }
        Ok(Self {
            path,
            state: RwLock::new(DeviceState::Closed),
            open: RwLock::new(None),
            verify_gate: VerifyGate::new(),
            removed: AtomicBool::new(false),
            events,
            pool_name: pool_name.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read().unwrap()
    }

    /// Marks this device `removed`, cancelling any in-progress open retry
    /// loop (spec §5 "Device open retry is cancelled when the device is
    /// marked removed").
    pub fn mark_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    /// Open contract (spec §4.A): acquire exclusive direct-mode access,
    /// probe geometry, spawn queue workers. On any failure, partial state
    /// is dropped and a single error kind is returned.
    pub fn open(&self) -> Result<(), ErrorKind> {
        {
            let mut state = self.state.write().unwrap();
            if *state != DeviceState::Closed {
                return Err(ErrorKind::Busy(format!(
                    "{}: already open or opening",
                    self.path.display()
                )));
            }
            *state = DeviceState::Opening;
        }

        match self.open_inner() {
            Ok(open_state) => {
                *self.open.write().unwrap() = Some(open_state);
                *self.state.write().unwrap() = DeviceState::Open;
                info!(path = %self.path.display(), "device opened");
                Ok(())
            }
            Err(e) => {
                *self.state.write().unwrap() = DeviceState::Closed;
                Err(e)
            }
        }
    }

    fn open_inner(&self) -> Result<OpenState, ErrorKind> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_DIRECT)
            .open(&self.path)
            .map_err(|e| ErrorKind::OpenFailed(self.path.clone(), e.to_string()))?;

        let geom = geometry::probe(&file)
            .map_err(|e| ErrorKind::OpenFailed(self.path.clone(), e.to_string()))?;

        let file = Arc::new(file);
        let n_queues = MAX_THREADS.min(num_cpus_hint());
        let device_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());

        let mut queues = Vec::with_capacity(n_queues);
        for id in 0..n_queues {
            queues.push(QueueWorker::spawn(id, device_name.clone(), file.clone()));
        }

        Ok(OpenState {
            file,
            geometry: geom,
            queues,
            flush_supported: AtomicBool::new(geom.flush_supported),
        })
    }

    /// Close: stop accepting submissions, tear down queue workers, drop the
    /// file handle.
    pub fn close(&self) -> Result<(), ErrorKind> {
        {
            let mut state = self.state.write().unwrap();
            if *state != DeviceState::Open {
                return Err(ErrorKind::NotActive(format!(
                    "{}: not open",
                    self.path.display()
                )));
            }
            *state = DeviceState::Closing;
        }
        let open_state = self.open.write().unwrap().take();
        drop(open_state); // queue workers join in QueueWorker::drop
        *self.state.write().unwrap() = DeviceState::Closed;
        info!(path = %self.path.display(), "device closed");
        Ok(())
    }

    /// Reopen: close-then-open, with a bounded exponential retry schedule
    /// if the partition table may have been resized (spec §4.A). `ENOENT`
    /// is retried, `ERESTARTSYS` extends the timeout tenfold, `ENXIO` is
    /// fatal.
    pub fn reopen(&self, possibly_resized: bool) -> Result<(), ErrorKind> {
        if self.state() == DeviceState::Open {
            self.close()?;
        }

        let tunables = Tunables::global();
        let mut timeout_ms = tunables.open_timeout_ms;
        if possibly_resized {
            timeout_ms *= 2;
        }

        let mut delay = Duration::from_millis(10);
        let max_delay = Duration::from_millis(timeout_ms.min(1000));
        let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            if self.removed.load(Ordering::SeqCst) {
                return Err(ErrorKind::Cancelled);
            }
            match self.open() {
                Ok(()) => return Ok(()),
                Err(ErrorKind::OpenFailed(_, reason)) => {
                    let errno = parse_errno(&reason);
                    if errno == Some(libc::ENXIO) {
                        return Err(ErrorKind::NotPresent(self.path.clone()));
                    }
                    if std::time::Instant::now() >= deadline {
                        return Err(ErrorKind::Timeout);
                    }
                    let this_delay = if errno == Some(ERESTARTSYS) {
                        delay * 10
                    } else {
                        delay
                    };
                    warn!(
                        path = %self.path.display(),
                        delay_ms = this_delay.as_millis() as u64,
                        "device reopen retry"
                    );
                    thread::sleep(this_delay);
                    delay = (delay * 2).min(max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit a logical I/O: checksum-verify gate on writes (spec §4.D),
    /// page-list build (spec §4.B), random queue assignment and enqueue
    /// (spec §4.A/§4.C).
    pub fn submit(&self, zio: Zio) -> Result<(), ErrorKind> {
        let guard = self.open.read().unwrap();
        let open_state = guard
            .as_ref()
            .ok_or_else(|| ErrorKind::NotActive(format!("{}: not open", self.path.display())))?;

        let kind = zio.kind;
        if matches!(kind, ZioKind::Flush)
            && !open_state.flush_supported.load(Ordering::Relaxed)
        {
            zio.retire();
            return Ok(());
        }

        let end = zio
            .offset
            .checked_add(zio.size)
            .filter(|&end| end <= open_state.geometry.capacity);
        if end.is_none() {
            return Err(ErrorKind::IoError(
                self.path.clone(),
                format!(
                    "I/O at offset {} size {} crosses device capacity {}",
                    zio.offset, zio.size, open_state.geometry.capacity
                ),
            ));
        }

        let tunables = Tunables::global();
        let issue_hash = if kind == ZioKind::Write {
            Some(VerifyGate::issue_hash(&zio.buffer))
        } else {
            None
        };
        let should_verify =
            kind == ZioKind::Write && self.verify_gate.should_verify(tunables.direct_wr_verify_cnt);
        // Kept alongside (not inside) the vbio's `source`: re-verification
        // must look at the caller's original buffer, not a bounce copy
        // taken from it at build time, or a mutation made after the bounce
        // copy would be invisible to the gate (spec §4.D).
        let original_buffer = zio.buffer.clone();

        let logical_block_size = 1u64 << open_state.geometry.logical_block_shift;
        let vbio = vbio::build(zio, logical_block_size, tunables.disk_max_segs)?;

        vbio::arm_for_submit(&vbio);
        if should_verify {
            if let Some(issue_hash) = issue_hash {
                // The actual re-hash happens in the queue worker that picks
                // up this write's first sub-batch, immediately before its
                // `pwrite` (spec §4.D) — closer to the syscall than doing it
                // here, before the sub-batch has even been enqueued.
                vbio::arm_verify(
                    &vbio,
                    vbio::VerifyContext {
                        original: original_buffer,
                        issue_hash,
                        pool: self.pool_name.clone(),
                        events: self.events.clone(),
                    },
                );
            }
        }

        let vbio = Arc::new(vbio);
        for index in 0..vbio.sub_batch_count() {
            let q = pick_queue(&open_state.queues);
            open_state.queues[q].submit(SubBatchJob {
                vbio: vbio.clone(),
                index,
            })?;
        }
        if vbio::release_protecting_ref(&vbio) {
            vbio.finish();
        }
        Ok(())
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.open.read().unwrap().as_ref().map(|s| s.geometry)
    }
}

fn num_cpus_hint() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `OpenFailed`'s reason string carries `io::Error`'s `Display`, which for
/// an os error ends with `(os error N)`; pull N back out for branching on
/// specific errno values during reopen.
fn parse_errno(reason: &str) -> Option<i32> {
    let start = reason.rfind("(os error ")?;
    let rest = &reason[start + "(os error ".len()..];
    let end = rest.find(')')?;
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdev_core::zio::{AbdBuffer, ZioFlags};

    fn events() -> Arc<EventRing> {
        Arc::new(EventRing::new())
    }

    // Builds an OpenState directly against a tempfile instead of going
    // through LeafDevice::open, since O_DIRECT requires a real block
    // device.
    fn open_device(capacity: u64) -> LeafDevice {
        let file = tempfile::tempfile().unwrap();
        file.set_len(capacity).unwrap();
        let file = Arc::new(file);
        let geometry = Geometry {
            capacity,
            logical_block_shift: 9,
            physical_block_shift: 9,
            non_rotational: true,
            flush_supported: true,
            trim_supported: false,
            secure_trim_supported: false,
        };
        let open_state = OpenState {
            queues: vec![QueueWorker::spawn(0, "test0".into(), file.clone())],
            file,
            geometry,
            flush_supported: AtomicBool::new(true),
        };
        let dev = LeafDevice::new("/dev/test0", "tank", events()).unwrap();
        *dev.open.write().unwrap() = Some(open_state);
        *dev.state.write().unwrap() = DeviceState::Open;
        dev
    }

    #[test]
    fn submit_rejects_write_crossing_capacity() {
        let dev = open_device(4096);
        let buf = AbdBuffer::contiguous(vec![0xAB; 512]);
        let zio = Zio::new(
            ZioKind::Write,
            4096 - 256,
            512,
            buf,
            ZioFlags::empty(),
            dev.path().to_path_buf(),
            Box::new(|_| {}),
        );
        let err = dev.submit(zio).unwrap_err();
        assert!(matches!(err, ErrorKind::IoError(_, _)));
    }

    #[test]
    fn submit_accepts_write_within_capacity() {
        let dev = open_device(4096);
        let buf = AbdBuffer::contiguous(vec![0xAB; 512]);
        let zio = Zio::new(
            ZioKind::Write,
            0,
            512,
            buf,
            ZioFlags::empty(),
            dev.path().to_path_buf(),
            Box::new(|_| {}),
        );
        dev.submit(zio).unwrap();
    }

    #[test]
    fn rejects_relative_path() {
        let err = LeafDevice::new("relative/path", "tank", events()).unwrap_err();
        assert!(matches!(err, ErrorKind::BadLabel(_)));
    }

    #[test]
    fn starts_closed() {
        let dev = LeafDevice::new("/dev/does-not-exist-0", "tank", events()).unwrap();
        assert_eq!(dev.state(), DeviceState::Closed);
    }

    #[test]
    fn parse_errno_extracts_os_error_code() {
        let reason = "No such device or address (os error 6)";
        assert_eq!(parse_errno(reason), Some(6));
    }

    #[test]
    fn close_before_open_is_not_active() {
        let dev = LeafDevice::new("/dev/does-not-exist-0", "tank", events()).unwrap();
        let err = dev.close().unwrap_err();
        assert!(matches!(err, ErrorKind::NotActive(_)));
    }
}
