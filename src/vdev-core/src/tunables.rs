//! Process-wide configuration (spec §6.4). Constructed once from the
//! environment and cached behind a `OnceLock`, mirroring the teacher
//! codebase's habit of stashing process-wide state behind a
//! lazily-initialized static rather than threading a config struct through
//! every call (e.g. `libkrun`'s shared VM state).

use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    /// Every N-th write is re-hashed before commit. Must be >= 1.
    pub direct_wr_verify_cnt: u32,
    /// Clamp on sub-batch segment count; 0 means "driver's ideal".
    pub disk_max_segs: u32,
    /// Bound for the open retry loop, doubled on reopen-after-resize.
    pub open_timeout_ms: u64,
    /// 3-bit failfast mask: bit0 device, bit1 transport, bit2 driver.
    pub failfast_mask: u8,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            direct_wr_verify_cnt: 100,
            disk_max_segs: 0,
            open_timeout_ms: 1000,
            failfast_mask: 1,
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Tunables {
    fn from_env() -> Self {
        let defaults = Self::default();
        let cnt = env_u32("ZVDEV_DIRECT_WR_VERIFY_CNT", defaults.direct_wr_verify_cnt).max(1);
        let max_segs = env_u32("ZVDEV_DISK_MAX_SEGS", defaults.disk_max_segs);
        let open_timeout_ms = env_u64("ZVDEV_OPEN_TIMEOUT_MS", defaults.open_timeout_ms);
        let failfast_mask =
            (env_u32("ZVDEV_FAILFAST_MASK", defaults.failfast_mask as u32) & 0b111) as u8;
        Self {
            direct_wr_verify_cnt: cnt,
            disk_max_segs: max_segs,
            open_timeout_ms,
            failfast_mask,
        }
    }

    /// The process-wide tunables, read once from the environment on first
    /// access and shared thereafter.
    pub fn global() -> &'static Tunables {
        static TUNABLES: OnceLock<Tunables> = OnceLock::new();
        TUNABLES.get_or_init(Tunables::from_env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let t = Tunables::default();
        assert_eq!(t.direct_wr_verify_cnt, 100);
        assert_eq!(t.disk_max_segs, 0);
        assert_eq!(t.open_timeout_ms, 1000);
        assert_eq!(t.failfast_mask, 1);
    }
}
