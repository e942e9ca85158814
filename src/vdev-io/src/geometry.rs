//! Block-device geometry probing (spec §4.A open contract): capacity,
//! logical/physical block size, non-rotational-ness, trim/secure-trim and
//! flush support.
//!
//! Real leaf vdevs are block special files, probed through
//! `ioctl(BLKGETSIZE64, ...)` and friends on Linux. Test fixtures and
//! loopback-file pools back onto plain regular files, probed through
//! `fstat`/`statvfs` instead; both paths are kept so unit tests can run
//! against a `tempfile` without root or a real block device.

use std::fs::File;
use std::os::unix::io::AsRawFd;

use nix::sys::stat::{fstat, SFlag};

#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub capacity: u64,
    pub logical_block_shift: u32,
    pub physical_block_shift: u32,
    pub non_rotational: bool,
    pub flush_supported: bool,
    pub trim_supported: bool,
    pub secure_trim_supported: bool,
}

#[cfg(target_os = "linux")]
mod linux_ioctl {
    use std::os::unix::io::RawFd;

    const BLKGETSIZE64: libc::c_ulong = 0x80081272;
    const BLKSSZGET: libc::c_ulong = 0x1268;
    const BLKPBSZGET: libc::c_ulong = 0x127b;
    const BLKROTATIONAL: libc::c_ulong = 0x127e;
    const BLKDISCARDZEROES: libc::c_ulong = 0x127c;

    /// Best-effort ioctl: returns `None` on any failure rather than
    /// propagating, since callers fall back to a conservative default.
    unsafe fn ioctl_u64(fd: RawFd, req: libc::c_ulong) -> Option<u64> {
        let mut val: u64 = 0;
        let rc = libc::ioctl(fd, req as _, &mut val as *mut u64);
        if rc == 0 {
            Some(val)
        } else {
            None
        }
    }

    unsafe fn ioctl_u32(fd: RawFd, req: libc::c_ulong) -> Option<u32> {
        let mut val: libc::c_int = 0;
        let rc = libc::ioctl(fd, req as _, &mut val as *mut libc::c_int);
        if rc == 0 {
            Some(val as u32)
        } else {
            None
        }
    }

    pub fn block_size_bytes(fd: RawFd) -> Option<u64> {
        unsafe { ioctl_u64(fd, BLKGETSIZE64) }
    }

    pub fn logical_block_size(fd: RawFd) -> Option<u32> {
        unsafe { ioctl_u32(fd, BLKSSZGET) }
    }

    pub fn physical_block_size(fd: RawFd) -> Option<u32> {
        unsafe { ioctl_u32(fd, BLKPBSZGET) }
    }

    pub fn rotational(fd: RawFd) -> Option<bool> {
        unsafe { ioctl_u64(fd, BLKROTATIONAL) }.map(|v| v != 0)
    }

    pub fn discard_zeroes(fd: RawFd) -> Option<bool> {
        unsafe { ioctl_u64(fd, BLKDISCARDZEROES) }.map(|v| v != 0)
    }
}

fn ilog2_floor(v: u32) -> u32 {
    31 - v.leading_zeros()
}

pub fn probe(file: &File) -> nix::Result<Geometry> {
    let st = fstat(file.as_raw_fd())?;
    let is_block_device = SFlag::from_bits_truncate(st.st_mode) == SFlag::S_IFBLK;

    #[cfg(target_os = "linux")]
    if is_block_device {
        let fd = file.as_raw_fd();
        let capacity = linux_ioctl::block_size_bytes(fd).unwrap_or(st.st_size as u64);
        let logical = linux_ioctl::logical_block_size(fd).unwrap_or(512);
        let physical = linux_ioctl::physical_block_size(fd).unwrap_or(logical);
        return Ok(Geometry {
            capacity,
            logical_block_shift: ilog2_floor(logical.max(512)),
            physical_block_shift: ilog2_floor(physical.max(logical)),
            non_rotational: !linux_ioctl::rotational(fd).unwrap_or(false),
            flush_supported: true,
            trim_supported: linux_ioctl::discard_zeroes(fd).is_some(),
            secure_trim_supported: false,
        });
    }

    let _ = is_block_device;
    // Regular-file fallback: used for test fixtures and for loopback-file
    // backed pools. `st_blksize` stands in for both logical and physical
    // block size since a regular file has no separate optimal-I/O-size
    // concept.
    let block_size = (st.st_blksize.max(512)) as u32;
    Ok(Geometry {
        capacity: st.st_size as u64,
        logical_block_shift: ilog2_floor(block_size),
        physical_block_shift: ilog2_floor(block_size),
        non_rotational: true,
        flush_supported: true,
        trim_supported: false,
        secure_trim_supported: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ilog2_floor_powers_of_two() {
        assert_eq!(ilog2_floor(512), 9);
        assert_eq!(ilog2_floor(4096), 12);
    }

    #[test]
    fn probes_regular_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        f.as_file().set_len(1 << 20).unwrap();
        let geo = probe(f.as_file()).unwrap();
        assert_eq!(geo.capacity, 1 << 20);
        assert!(geo.logical_block_shift >= 9);
    }
}
