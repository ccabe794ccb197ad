//! Coroutine identifier type

use core::fmt;

/// Unique identifier for a coroutine
///
/// Ids are handed out per OS thread in increasing order and are never
/// reused while the thread's engine lives. Two values are reserved:
/// `SCHEDULER` (0) and `MAIN` (1).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoroutineId(u64);

impl CoroutineId {
    /// The scheduler coroutine of a thread
    pub const SCHEDULER: CoroutineId = CoroutineId(0);

    /// The main coroutine (the thread's original stack)
    pub const MAIN: CoroutineId = CoroutineId(1);

    /// First id given to an application coroutine
    pub const FIRST_USER: CoroutineId = CoroutineId(2);

    /// Sentinel meaning "no coroutine", used by the atomic snapshot
    pub const NONE: CoroutineId = CoroutineId(u64::MAX);

    /// Create a new CoroutineId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        CoroutineId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this id is reserved for the engine (scheduler or main)
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }

    /// The id following this one
    #[inline]
    pub const fn next(self) -> Self {
        CoroutineId(self.0 + 1)
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<CoroutineId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u64> for CoroutineId {
    #[inline]
    fn from(id: u64) -> Self {
        CoroutineId(id)
    }
}

impl From<CoroutineId> for u64 {
    #[inline]
    fn from(id: CoroutineId) -> Self {
        id.0
    }
}

impl fmt::Debug for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CoroutineId::NONE => write!(f, "CoroutineId(NONE)"),
            CoroutineId::SCHEDULER => write!(f, "CoroutineId(scheduler)"),
            CoroutineId::MAIN => write!(f, "CoroutineId(main)"),
            CoroutineId(id) => write!(f, "CoroutineId({})", id),
        }
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for CoroutineId {
    fn default() -> Self {
        CoroutineId::NONE
    }
}
