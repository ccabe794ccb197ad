//! Error types for the coroutine engine
//!
//! Every failure carries an [`ErrorKind`] (the taxonomy callers match on)
//! and a human-readable message. Higher layers add context with
//! [`EngineError::context`], which keeps the original kind.

use core::fmt;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Kind of an engine error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// API used in a way that can never succeed (EMISUSE)
    Misuse,

    /// Invalid argument value (EINVAL)
    InvalidValue,

    /// Target is running or a resume is in flight (EBUSY)
    Busy,

    /// Target coroutine is dead (ESRCH)
    NotFound,

    /// Handle refers to a freed arena slot
    StaleHandle,

    /// Wait ended by forced closure (ECANCELED)
    Canceled,

    /// Wait ended by its timer (ETIMEDOUT)
    TimedOut,

    /// Scheduler found no runnable work (EDEADLK)
    Deadlock,

    /// Stack or context memory could not be obtained (ENOMEM)
    OutOfMemory,

    /// Coroutine body panicked
    Panicked,

    /// An OS call failed; the raw errno is in the message
    Syscall,
}

impl ErrorKind {
    /// Errno-style symbolic name
    pub const fn name(&self) -> &'static str {
        match self {
            ErrorKind::Misuse => "EMISUSE",
            ErrorKind::InvalidValue => "EINVAL",
            ErrorKind::Busy => "EBUSY",
            ErrorKind::NotFound => "ESRCH",
            ErrorKind::StaleHandle => "ESTALE",
            ErrorKind::Canceled => "ECANCELED",
            ErrorKind::TimedOut => "ETIMEDOUT",
            ErrorKind::Deadlock => "EDEADLK",
            ErrorKind::OutOfMemory => "ENOMEM",
            ErrorKind::Panicked => "EPANIC",
            ErrorKind::Syscall => "ESYSCALL",
        }
    }

    /// Stable negative code, usable across an FFI boundary
    pub const fn code(&self) -> i32 {
        match self {
            ErrorKind::Misuse => -9764,
            ErrorKind::InvalidValue => -22,
            ErrorKind::Busy => -16,
            ErrorKind::NotFound => -3,
            ErrorKind::StaleHandle => -116,
            ErrorKind::Canceled => -125,
            ErrorKind::TimedOut => -110,
            ErrorKind::Deadlock => -35,
            ErrorKind::OutOfMemory => -12,
            ErrorKind::Panicked => -9765,
            ErrorKind::Syscall => -9766,
        }
    }

    /// Misuse-class errors are always the caller's to fix
    pub const fn is_misuse(&self) -> bool {
        matches!(self, ErrorKind::Misuse | ErrorKind::InvalidValue)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine error: a kind plus a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({kind})")]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misuse, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimedOut, message)
    }

    /// Wrap an OS error, keeping its errno in the message
    pub fn syscall(op: &str, err: std::io::Error) -> Self {
        Self::new(ErrorKind::Syscall, format!("{} failed: {}", op, err))
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with caller context; the kind is preserved
    pub fn context(mut self, ctx: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", ctx, self.message);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = EngineError::misuse("nowhere to yield");
        assert_eq!(format!("{}", e), "nowhere to yield (EMISUSE)");
        assert_eq!(e.kind(), ErrorKind::Misuse);
    }

    #[test]
    fn test_context_keeps_kind() {
        let e = EngineError::canceled("wait was canceled").context("read fd 3");
        assert_eq!(e.kind(), ErrorKind::Canceled);
        assert_eq!(e.message(), "read fd 3: wait was canceled");
    }

    #[test]
    fn test_codes_are_distinct() {
        let kinds = [
            ErrorKind::Misuse,
            ErrorKind::InvalidValue,
            ErrorKind::Busy,
            ErrorKind::NotFound,
            ErrorKind::StaleHandle,
            ErrorKind::Canceled,
            ErrorKind::TimedOut,
            ErrorKind::Deadlock,
            ErrorKind::OutOfMemory,
            ErrorKind::Panicked,
            ErrorKind::Syscall,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(ErrorKind::Misuse.is_misuse());
        assert!(!ErrorKind::Busy.is_misuse());
    }
}
