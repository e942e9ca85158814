//! The logical I/O request ("zio") and its backing buffer.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ErrorKind;
use crate::hash::Hash256;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ZioFlags: u32 {
        const RETRY       = 1 << 0;
        const TRY_HARD    = 1 << 1;
        const TRIM_SECURE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZioKind {
    Read,
    Write,
    Flush,
    Trim,
}

/// One page reference inside an ABD.
///
/// Backed by a cell of `AtomicU8`s rather than a plain byte slice: this
/// buffer is owned by a caller that may concurrently overwrite it via
/// direct I/O while the driver is still looking at it. Plain shared bytes
/// mutated from another thread without synchronization is a data race and
/// undefined behavior in Rust; the atomics make the same concurrent
/// overwrite merely racy instead.
#[derive(Clone)]
pub struct PageRef {
    pub data: Arc<[AtomicU8]>,
    /// Offset of this segment's start within `data`.
    pub offset: usize,
    /// Usable length of this segment.
    pub len: usize,
}

impl PageRef {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        let cells: Vec<AtomicU8> = bytes.into_iter().map(AtomicU8::new).collect();
        Self {
            data: cells.into(),
            offset: 0,
            len,
        }
    }

    /// Snapshot this segment's current bytes. Each byte is read
    /// independently, so a concurrent partial write can be observed as a
    /// mix of old and new bytes — this is what the verify gate exists to
    /// catch.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data[self.offset..self.offset + self.len]
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    /// Overwrite this segment's bytes, e.g. after a completed read.
    pub fn write_from(&self, src: &[u8]) {
        debug_assert_eq!(src.len(), self.len);
        for (cell, &byte) in self.data[self.offset..self.offset + self.len]
            .iter()
            .zip(src)
        {
            cell.store(byte, Ordering::Relaxed);
        }
    }
}

/// An ABD: a buffer that may be contiguous or a scatter/gather list of
/// pages. Iterated by offset/length, never indexed randomly.
#[derive(Clone, Default)]
pub struct AbdBuffer {
    pages: Vec<PageRef>,
}

impl AbdBuffer {
    pub fn contiguous(bytes: Vec<u8>) -> Self {
        Self {
            pages: vec![PageRef::from_bytes(bytes)],
        }
    }

    pub fn from_pages(pages: Vec<PageRef>) -> Self {
        Self { pages }
    }

    pub fn pages(&self) -> &[PageRef] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the buffer into one contiguous snapshot (used for the
    /// bounce-buffer path and for checksum hashing).
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for page in &self.pages {
            out.extend(page.snapshot());
        }
        out
    }

    /// Overwrite this buffer's bytes from a single contiguous source (used
    /// to copy a completed read's bytes back from a bounce buffer into the
    /// caller's original buffer).
    pub fn write_from_contiguous(&self, src: &[u8]) {
        let mut pos = 0usize;
        for page in &self.pages {
            page.write_from(&src[pos..pos + page.len]);
            pos += page.len;
        }
    }

    /// True iff, after the first page, every page starts on a multiple of
    /// `logical_block_size` and no gap is introduced by a tail-short
    /// segment (spec §4.B alignment gate).
    pub fn is_aligned(&self, logical_block_size: u64) -> bool {
        let mut running = 0u64;
        for (i, page) in self.pages.iter().enumerate() {
            if i > 0 && running % logical_block_size != 0 {
                return false;
            }
            running += page.len as u64;
        }
        true
    }
}

pub type CompletionCallback = Box<dyn FnOnce(Result<(), ErrorKind>) + Send>;

/// The logical I/O request (spec §3 "Logical I/O (zio)").
pub struct Zio {
    pub kind: ZioKind,
    pub offset: u64,
    pub size: u64,
    pub buffer: AbdBuffer,
    pub flags: ZioFlags,
    pub device_path: PathBuf,
    pub issue_hash: Option<Hash256>,
    pub delay_target: Option<Instant>,
    pub error: Option<ErrorKind>,
    callback: Option<CompletionCallback>,
}

impl fmt::Debug for Zio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zio")
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("device_path", &self.device_path)
            .field("error", &self.error)
            .finish()
    }
}

impl Zio {
    pub fn new(
        kind: ZioKind,
        offset: u64,
        size: u64,
        buffer: AbdBuffer,
        flags: ZioFlags,
        device_path: PathBuf,
        callback: CompletionCallback,
    ) -> Self {
        Self {
            kind,
            offset,
            size,
            buffer,
            flags,
            device_path,
            issue_hash: None,
            delay_target: None,
            error: None,
            callback: Some(callback),
        }
    }

    /// Retire the zio: invoke its completion callback exactly once and
    /// release the buffer reference, matching spec §3's "a zio never
    /// outlives its source buffer; the driver must not retain buffer
    /// references after completion".
    pub fn retire(mut self) {
        let result = match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        if let Some(cb) = self.callback.take() {
            cb(result);
        }
    }
}
