//! Client-visible error kinds.
//!
//! These are kinds, not rich error types: the completion dispatcher and the
//! activity state machine both collapse whatever the OS or driver handed
//! back into one of these before handing it to a caller.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("{0}: no such device or address")]
    NotPresent(PathBuf),

    #[error("{0}: bad label")]
    BadLabel(PathBuf),

    #[error("{0}: open failed: {1}")]
    OpenFailed(PathBuf, String),

    #[error("{0}: i/o error: {1}")]
    IoError(PathBuf, String),

    #[error("{0}: checksum verify failed at offset {1}, size {2}")]
    VerifyFailed(PathBuf, u64, u64),

    #[error("{0}: operation not supported: {1}")]
    UnsupportedOperation(PathBuf, &'static str),

    #[error("{0}")]
    Busy(String),

    #[error("{0}")]
    NotActive(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("cancelled")]
    Cancelled,

    #[error("timed out")]
    Timeout,

    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, ErrorKind>;

impl ErrorKind {
    /// Exit code a CLI should use when this error reaches the top of `main`:
    /// 0 success, 1 recoverable failure, 2 usage error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidArgument(_) => 2,
            _ => 1,
        }
    }

    /// Asserts an invariant: panics in debug builds, returns the error kind
    /// in release builds rather than aborting the process.
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if cfg!(debug_assertions) {
            panic!("invariant violated: {msg}");
        }
        tracing::error!(%msg, "invariant violated");
        ErrorKind::Invariant(msg)
    }
}
