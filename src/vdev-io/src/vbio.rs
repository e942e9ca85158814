//! Page-list builder (spec §4.B): translates a logical I/O plus its source
//! buffer into one or more aligned scatter/gather sub-batches bounded by
//! device segment limits, falling back to a bounce copy when alignment
//! fails.
//!
//! Grounded on the segment-iteration shape of the teacher's virtio block
//! hvc path (`devices/src/virtio/block/hvc.rs::for_each_desc`, which walks
//! a bounded descriptor array and builds one iovec per segment) and its
//! `descriptor_utils::Iovec` scatter/gather type, adapted from guest-memory
//! descriptors to host page references.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vdev_core::error::ErrorKind;
use vdev_core::events::EventRing;
use vdev_core::hash::Hash256;
use vdev_core::zio::{AbdBuffer, PageRef, Zio, ZioKind};

pub const SECTOR_SIZE: u64 = 512;

/// One underlying block-layer request inside a vbio (spec GLOSSARY
/// "Sub-batch").
#[derive(Clone)]
pub struct SubBatch {
    pub starting_sector: u64,
    pub sector_len: u64,
    pub pages: Vec<PageRef>,
}

impl SubBatch {
    fn byte_len(&self) -> usize {
        self.pages.iter().map(|p| p.len).sum()
    }
}

/// What a queue worker needs to re-verify a write immediately before its
/// `pwrite` (spec §4.D): the caller's original buffer, captured at submit
/// time before it could be mutated again, and where to report a mismatch.
pub struct VerifyContext {
    pub original: AbdBuffer,
    pub issue_hash: Hash256,
    pub pool: String,
    pub events: Arc<EventRing>,
}

/// A page-list batch (spec §3 "Page-list batch (vbio)").
pub struct VBio {
    pub device_path: PathBuf,
    pub zio_kind: ZioKind,
    pub zio_offset: u64,
    pub zio_size: u64,
    pub sub_batches: Vec<SubBatch>,
    /// Present iff the alignment gate failed and a bounce copy was used.
    /// Holds the original caller buffer so a completed read can be copied
    /// back into it, and the bounce bytes read/written against the device.
    pub bounce: Option<AbdBuffer>,
    /// The original caller buffer for writes (or the bounce-copy source),
    /// needed by the dispatcher to materialize bytes for the syscall.
    pub source: AbdBuffer,
    /// The parent zio, released back to its issuer by whichever dispatch
    /// call observes the ref count reach zero (spec §4.B Completion).
    pub zio_slot: Mutex<Option<Zio>>,
    /// Taken by whichever worker dispatches this vbio's first sub-batch
    /// (spec §4.D); `None` once taken or if this write wasn't sampled for
    /// verification.
    pub verify: Mutex<Option<VerifyContext>>,
    ref_count: AtomicUsize,
    error: Mutex<Option<ErrorKind>>,
}

impl std::fmt::Debug for VBio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VBio")
            .field("device_path", &self.device_path)
            .field("zio_kind", &self.zio_kind)
            .field("zio_offset", &self.zio_offset)
            .field("zio_size", &self.zio_size)
            .finish_non_exhaustive()
    }
}

impl VBio {
    pub fn sub_batch_count(&self) -> usize {
        self.sub_batches.len()
    }

    /// First-error-wins: later errors are discarded (spec §4.B Completion).
    pub fn record_error(&self, err: ErrorKind) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take_error(&self) -> Option<ErrorKind> {
        self.error.lock().unwrap().take()
    }

    /// Decrements the ref count; returns true iff this call brought it to
    /// zero (the caller that observes zero is responsible for retirement).
    pub fn release(&self) -> bool {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Runs once, by whichever worker observes the ref count reach zero:
    /// copies a bounce buffer back for completed reads, sets the zio's
    /// error, and retires it to the issuer (spec §4.B Completion).
    pub fn finish(&self) {
        let zio = self.zio_slot.lock().unwrap().take();
        let Some(mut zio) = zio else {
            return;
        };
        let err = self.take_error();
        if err.is_none() {
            if let (ZioKind::Read, Some(bounce)) = (self.zio_kind, &self.bounce) {
                zio.buffer.write_from_contiguous(&bounce.to_contiguous());
            }
        }
        zio.error = err;
        zio.retire();
    }
}

/// Walk the buffer and verify that after the first page every subsequent
/// page starts on a multiple of `logical_block_size` and no tail-short
/// segment introduces a gap (spec §4.B "Alignment gate").
fn is_aligned(buffer: &AbdBuffer, logical_block_size: u64) -> bool {
    buffer.is_aligned(logical_block_size)
}

fn bounce_pages(bytes: &[u8]) -> Vec<PageRef> {
    vec![PageRef::from_bytes(bytes.to_vec())]
}

/// Build the page list for `zio`'s buffer, clamping per-sub-batch segment
/// count to at least 4 (spec §4.B). Takes ownership of the zio: it is
/// stashed in the returned vbio's `zio_slot` until the last sub-batch
/// completes.
pub fn build(
    zio: Zio,
    logical_block_size: u64,
    max_segs_hint: u32,
) -> Result<VBio, ErrorKind> {
    let device_path = zio.device_path.clone();
    let zio_kind = zio.kind;
    let zio_offset = zio.offset;
    let zio_size = zio.size;

    if zio_size == 0 {
        return Err(ErrorKind::invariant("zero-size zio"));
    }
    if zio_offset.checked_add(zio_size).is_none() {
        return Err(ErrorKind::invariant("zio offset + size overflows"));
    }

    let max_segs = (max_segs_hint as usize).max(4);

    let (pages, bounce, source) = if is_aligned(&zio.buffer, logical_block_size) {
        (zio.buffer.pages().to_vec(), None, zio.buffer.clone())
    } else {
        let contiguous = zio.buffer.to_contiguous();
        let rewalked = AbdBuffer::from_pages(bounce_pages(&contiguous));
        if !is_aligned(&rewalked, logical_block_size) {
            return Err(ErrorKind::invariant(
                "bounce buffer still unaligned after rewalk",
            ));
        }
        (rewalked.pages().to_vec(), Some(rewalked.clone()), rewalked)
    };

    let n_sub_batches = pages.len().div_ceil(max_segs).max(1);
    let mut sub_batches: Vec<SubBatch> = Vec::with_capacity(n_sub_batches);
    sub_batches.push(SubBatch {
        starting_sector: zio_offset / SECTOR_SIZE,
        sector_len: 0,
        pages: Vec::new(),
    });

    let mut current_offset = zio_offset;
    for page in pages {
        let page_len = page.len as u64;
        let current = sub_batches.last_mut().expect("at least one sub-batch");
        if current.pages.len() < max_segs {
            current.pages.push(page);
        } else {
            let sealed_len = current.byte_len() as u64;
            current.sector_len = sealed_len.div_ceil(SECTOR_SIZE);
            sub_batches.push(SubBatch {
                starting_sector: current_offset / SECTOR_SIZE,
                sector_len: 0,
                pages: Vec::new(),
            });
            let fresh = sub_batches.last_mut().unwrap();
            if fresh.pages.len() >= max_segs {
                return Err(ErrorKind::invariant("fresh sub-batch already full"));
            }
            fresh.pages.push(page);
        }
        current_offset += page_len;
    }

    if let Some(last) = sub_batches.last_mut() {
        last.sector_len = (last.byte_len() as u64).div_ceil(SECTOR_SIZE);
    }

    let total: u64 = sub_batches.iter().map(|s| s.byte_len() as u64).sum();
    if total != zio_size {
        return Err(ErrorKind::invariant(format!(
            "sub-batch byte total {total} != zio size {zio_size}"
        )));
    }

    Ok(VBio {
        device_path,
        zio_kind,
        zio_offset,
        zio_size,
        sub_batches,
        bounce,
        source,
        zio_slot: Mutex::new(Some(zio)),
        verify: Mutex::new(None),
        ref_count: AtomicUsize::new(0),
        error: Mutex::new(None),
    })
}

/// Arms this write for re-verification immediately before its first
/// sub-batch is dispatched (spec §4.D). Called by `device::submit` in place
/// of verifying synchronously there.
pub fn arm_verify(vbio: &VBio, ctx: VerifyContext) {
    *vbio.verify.lock().unwrap() = Some(ctx);
}

/// Arms the vbio for submission: one reference per sub-batch plus one
/// protecting reference held until all sub-batches are enqueued (spec §4.B
/// Submit).
pub fn arm_for_submit(vbio: &VBio) {
    let n = vbio.sub_batch_count();
    vbio.ref_count.store(n + 1, Ordering::Release);
}

/// Releases the protecting reference taken by `arm_for_submit`. Returns
/// true iff this was the last reference (all sub-batches already
/// completed before submission finished enqueuing them).
pub fn release_protecting_ref(vbio: &VBio) -> bool {
    vbio.release()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vdev_core::zio::{AbdBuffer, Zio, ZioFlags};

    fn dev() -> PathBuf {
        PathBuf::from("/dev/test0")
    }

    fn zio(kind: ZioKind, offset: u64, size: u64, buffer: AbdBuffer) -> Zio {
        Zio::new(
            kind,
            offset,
            size,
            buffer,
            ZioFlags::empty(),
            dev(),
            Box::new(|_| {}),
        )
    }

    #[test]
    fn single_sub_batch_for_small_aligned_write() {
        let buf = AbdBuffer::contiguous(vec![0u8; 4096]);
        let vbio = build(zio(ZioKind::Write, 0, 4096, buf), 512, 0).unwrap();
        assert_eq!(vbio.sub_batch_count(), 1);
        assert!(vbio.bounce.is_none());
        assert_eq!(vbio.sub_batches[0].sector_len, 8);
    }

    #[test]
    fn splits_into_multiple_sub_batches_when_segments_exceed_max() {
        let pages = (0..10)
            .map(|_| PageRef::from_bytes(vec![0u8; 512]))
            .collect();
        let buf = AbdBuffer::from_pages(pages);
        let vbio = build(zio(ZioKind::Write, 0, 5120, buf), 512, 4).unwrap();
        assert_eq!(vbio.sub_batch_count(), 3);
        let total_sectors: u64 = vbio.sub_batches.iter().map(|s| s.sector_len).sum();
        assert_eq!(total_sectors, 10);
    }

    #[test]
    fn misaligned_interior_page_triggers_bounce() {
        let pages = vec![
            PageRef::from_bytes(vec![1u8; 512]),
            // interior page not a multiple of logical block size
            PageRef::from_bytes(vec![2u8; 300]),
            PageRef::from_bytes(vec![3u8; 212]),
        ];
        let buf = AbdBuffer::from_pages(pages);
        let vbio = build(zio(ZioKind::Write, 0, 1024, buf), 512, 0).unwrap();
        assert!(vbio.bounce.is_some());
        assert_eq!(vbio.sub_batches.len(), 1);
    }

    #[test]
    fn max_segs_below_four_is_clamped() {
        let pages = (0..5).map(|_| PageRef::from_bytes(vec![0u8; 512])).collect();
        let buf = AbdBuffer::from_pages(pages);
        // hint of 1 must still be clamped to 4
        let vbio = build(zio(ZioKind::Write, 0, 2560, buf), 512, 1).unwrap();
        assert_eq!(vbio.sub_batch_count(), 2);
    }

    #[test]
    fn zero_size_is_rejected() {
        let buf = AbdBuffer::contiguous(vec![]);
        let err = build(zio(ZioKind::Write, 0, 0, buf), 512, 0).unwrap_err();
        assert!(matches!(err, ErrorKind::Invariant(_)));
    }
}
