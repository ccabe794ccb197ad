//! Collaborator traits
//!
//! The engine does not own an event loop. Anything that can register
//! timer and fd interest and run one loop iteration on the engine's
//! thread can drive it by implementing [`Reactor`].

use core::fmt;
use core::ops::BitOr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Handle returned by [`Reactor::add_timer`], used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

impl TimerHandle {
    /// Generate a new unique timer handle
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value (for debugging/logging)
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Reactor::add_io`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoHandle(pub u64);

impl IoHandle {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        IoHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IoHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Readiness interest / readiness result for a file descriptor
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(2);
    /// Error or hang-up reported by the OS
    pub const ERROR: Interest = Interest(4);

    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub const fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Interest({}{}{})",
            if self.contains(Interest::READABLE) { "r" } else { "-" },
            if self.contains(Interest::WRITABLE) { "w" } else { "-" },
            if self.contains(Interest::ERROR) { "e" } else { "-" },
        )
    }
}

/// Event loop consumed by the scheduler coroutine and the wait primitive
///
/// Callbacks run on the reactor's thread from inside [`run_once`]
/// and typically resume the coroutine that armed them. Implementations
/// must not hold internal borrows while invoking a callback, because the
/// callback may re-enter the reactor (arm a new timer, cancel another).
///
/// [`run_once`]: Reactor::run_once
pub trait Reactor {
    /// Run one iteration: block until at least one armed event is due
    /// (or none is armed), fire the callbacks of everything ready.
    ///
    /// Returns `true` while timers or fd interests remain armed.
    fn run_once(&self) -> bool;

    /// Call `callback` once after `after` has elapsed
    fn add_timer(&self, after: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle;

    /// Disarm a timer. Returns `false` if it already fired or was unknown.
    fn cancel_timer(&self, handle: TimerHandle) -> bool;

    /// Call `callback` once when `fd` reports any of `interest`
    fn add_io(&self, fd: RawFd, interest: Interest, callback: Box<dyn FnOnce(Interest)>) -> IoHandle;

    /// Disarm an fd interest. Returns `false` if it already fired.
    fn cancel_io(&self, handle: IoHandle) -> bool;

    /// Number of armed timers and fd interests
    fn pending(&self) -> usize;

    /// Backend name for logs
    fn name(&self) -> &'static str {
        "unknown"
    }
}
