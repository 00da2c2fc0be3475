//! Error kinds for segment lifecycle and queue operations.

use std::io;
use thiserror::Error;

/// Errors surfaced by segments, endpoints, channels and the wait/notify
/// areas.
///
/// `WouldBlock` is the only transient kind: it means the ring was full (on
/// push) or empty (on pop) at that instant, and it is the only error the
/// blocking and timed forms retry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// The endpoint is already open.
    #[error("endpoint is already open")]
    InUse,

    /// Bad argument: zero-sized geometry, wrong element length, unopened
    /// endpoint, or a geometry mismatch against an existing segment header.
    #[error("invalid parameter or geometry mismatch")]
    InvalidParam,

    /// Ring full on push or empty on pop; retry later.
    #[error("ring is temporarily full or empty")]
    WouldBlock,

    /// A timed operation reached its deadline without succeeding.
    #[error("operation timed out")]
    TimedOut,

    /// The configured geometry overflows a 64-bit size or the platform
    /// file-offset type.
    #[error("configured size overflows")]
    Overflow,

    /// Object creation or mapping failed for lack of resources.
    #[error("out of memory")]
    OutOfMemory,

    /// Any other OS failure, carrying the native error code.
    #[error("os error {errno}")]
    Os {
        /// Raw `errno` value reported by the OS.
        errno: i32,
    },
}

impl RingError {
    /// Classify a raw `errno`, folding resource exhaustion into
    /// [`RingError::OutOfMemory`].
    pub(crate) fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOMEM | libc::EMFILE | libc::ENFILE => Self::OutOfMemory,
            _ => Self::Os { errno },
        }
    }

    /// Classify the calling thread's current OS error.
    pub(crate) fn last_os_error() -> Self {
        Self::from_errno(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }

    /// Returns `true` for the transient full/empty condition that blocking
    /// forms retry on.
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }

    /// Returns `true` if a timed operation gave up at its deadline.
    #[inline]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RingError>;
