//! Coroutine state and flag types

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// State of a coroutine
///
/// ```text
/// Init -> Waiting            (context built)
/// Waiting -> Locked          (resume in flight)
/// Locked -> Running          (switch completed)
/// Running -> Waiting         (yield, or resumed someone else)
/// Running -> Dead            (entry function returned)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroutineState {
    /// Allocated, context not built yet
    Init = 0,

    /// Suspended and resumable
    Waiting = 1,

    /// A resume targeting this coroutine is in progress
    Locked = 2,

    /// Currently executing on this thread
    Running = 3,

    /// Entry function returned, awaiting deferred free
    Dead = 4,
}

impl CoroutineState {
    /// Check if `resume` may target a coroutine in this state
    #[inline]
    pub const fn is_resumable(&self) -> bool {
        matches!(self, CoroutineState::Waiting)
    }

    /// Check if the coroutine has terminated
    #[inline]
    pub const fn is_dead(&self) -> bool {
        matches!(self, CoroutineState::Dead)
    }

    /// Check if the coroutine is on the CPU or about to be
    #[inline]
    pub const fn is_busy(&self) -> bool {
        matches!(self, CoroutineState::Running | CoroutineState::Locked)
    }
}

impl From<u8> for CoroutineState {
    fn from(v: u8) -> Self {
        match v {
            0 => CoroutineState::Init,
            1 => CoroutineState::Waiting,
            2 => CoroutineState::Locked,
            3 => CoroutineState::Running,
            _ => CoroutineState::Dead,
        }
    }
}

impl From<CoroutineState> for u8 {
    fn from(state: CoroutineState) -> u8 {
        state as u8
    }
}

impl fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoroutineState::Init => "init",
            CoroutineState::Waiting => "waiting",
            CoroutineState::Locked => "locked",
            CoroutineState::Running => "running",
            CoroutineState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Flag set carried by every coroutine
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct CoroutineFlags(u8);

impl CoroutineFlags {
    pub const NONE: CoroutineFlags = CoroutineFlags(0);

    /// Stack was allocated by the engine (not caller-provided)
    pub const ALLOCATED: CoroutineFlags = CoroutineFlags(1 << 0);

    /// Suspended inside resume/yield and willing to receive a payload
    pub const ACCEPT_DATA: CoroutineFlags = CoroutineFlags(1 << 1);

    /// This is the thread's scheduler coroutine
    pub const SCHEDULER: CoroutineFlags = CoroutineFlags(1 << 2);

    /// Keep the slot after death until `close()` is called
    pub const MANUAL_CLOSE: CoroutineFlags = CoroutineFlags(1 << 3);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: CoroutineFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: CoroutineFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: CoroutineFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for CoroutineFlags {
    type Output = CoroutineFlags;

    fn bitor(self, rhs: CoroutineFlags) -> CoroutineFlags {
        CoroutineFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CoroutineFlags {
    fn bitor_assign(&mut self, rhs: CoroutineFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for CoroutineFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CoroutineFlags, &str); 4] = [
            (CoroutineFlags::ALLOCATED, "ALLOCATED"),
            (CoroutineFlags::ACCEPT_DATA, "ACCEPT_DATA"),
            (CoroutineFlags::SCHEDULER, "SCHEDULER"),
            (CoroutineFlags::MANUAL_CLOSE, "MANUAL_CLOSE"),
        ];
        let mut first = true;
        write!(f, "CoroutineFlags(")?;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, ")")
    }
}
