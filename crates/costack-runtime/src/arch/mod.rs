//! Architecture-specific context switching
//!
//! Each backend saves the callee-saved register file of the running
//! coroutine and restores another one. Payloads are carried by the engine,
//! so the assembly only ever moves registers and stack pointers.

/// Entry point a fresh context lands in (through the arch trampoline)
pub type EntryFn = extern "C" fn(usize) -> !;

/// Register-level switch primitive implemented per architecture
pub trait ContextSwitch {
    /// Callee-saved register file
    type Regs: Default;

    /// Prepare `regs` so that switching to it calls `entry(arg)` on the
    /// stack ending at `stack_top`.
    ///
    /// # Safety
    ///
    /// `stack_top` must be the high end of a writable stack that outlives
    /// every switch into `regs`.
    unsafe fn init(regs: &mut Self::Regs, stack_top: *mut u8, entry: EntryFn, arg: usize);

    /// Save the running register file into `old` and resume `new`.
    ///
    /// Returns when some later switch restores `old`.
    ///
    /// # Safety
    ///
    /// Both pointers must be valid and `new` must hold a register file
    /// produced by `init` or by a previous save.
    unsafe fn switch(old: *mut Self::Regs, new: *const Self::Regs);
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::X86_64 as Native;
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::Aarch64 as Native;
    } else {
        compile_error!("costack supports x86_64 and aarch64 only");
    }
}

pub(crate) type Regs = <Native as ContextSwitch>::Regs;

/// Saved execution context of one coroutine
///
/// The register file is boxed so its address survives moves of the
/// owning arena entry.
pub struct Context {
    regs: Box<Regs>,
}

impl Context {
    /// Context of a thread's original stack; filled by the first switch out
    pub fn empty() -> Self {
        Self {
            regs: Box::default(),
        }
    }

    /// Context whose first activation runs `entry(arg)` on `stack_top`
    ///
    /// # Safety
    ///
    /// See [`ContextSwitch::init`].
    pub unsafe fn prepare(stack_top: *mut u8, entry: EntryFn, arg: usize) -> Self {
        let mut regs: Box<Regs> = Box::default();
        Native::init(&mut regs, stack_top, entry, arg);
        Self { regs }
    }

    #[inline]
    pub(crate) fn regs_mut(&mut self) -> *mut Regs {
        &mut *self.regs
    }

    #[inline]
    pub(crate) fn regs(&self) -> *const Regs {
        &*self.regs
    }
}

/// Switch from the context saved at `from` to `to`
///
/// # Safety
///
/// See [`ContextSwitch::switch`]. No `RefCell` borrow of engine state may
/// be held by the caller.
#[inline]
pub(crate) unsafe fn switch(from: *mut Regs, to: *const Regs) {
    Native::switch(from, to);
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("regs", &(self.regs() as usize as *const u8))
            .finish()
    }
}
