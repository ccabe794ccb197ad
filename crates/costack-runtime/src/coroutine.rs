//! Coroutine handles and the resume/yield API
//!
//! A [`Coroutine`] is a copyable generational handle into the current
//! thread's engine. It is only meaningful on the thread that created it;
//! once the coroutine is freed every operation on the handle fails with
//! `ErrorKind::StaleHandle`.
//!
//! ```ignore
//! let co = Coroutine::create(|data| {
//!     let got = yield_with(Some(Box::new(42u32))).ok().flatten();
//!     got
//! })?;
//! let answer = co.resume(None)?;
//! ```

use crate::engine::{switch_with, Body};
use crate::tls::{record, with_engine};
use costack_core::{
    CoroutineFlags, CoroutineId, CoroutineState, EngineError, EngineResult, Payload,
};
use std::fmt;
use std::time::Duration;

/// Handle to a coroutine of this thread's engine
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coroutine {
    slot: u32,
    generation: u32,
}

impl Coroutine {
    #[inline]
    pub(crate) const fn from_parts(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    #[inline]
    pub(crate) const fn slot(self) -> u32 {
        self.slot
    }

    #[inline]
    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }

    /// Create a coroutine with the default stack size
    ///
    /// The coroutine does not run until its first [`resume`](Self::resume);
    /// that resume's payload becomes `f`'s argument.
    pub fn create<F>(f: F) -> EngineResult<Coroutine>
    where
        F: FnOnce(Option<Payload>) -> Option<Payload> + 'static,
    {
        Builder::new().spawn(f)
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// The coroutine running right now
    pub fn current() -> Coroutine {
        with_engine(|engine| engine.current())
    }

    /// The coroutine standing for the thread's original stack
    pub fn main() -> Coroutine {
        with_engine(|engine| engine.main())
    }

    /// Transfer control to this coroutine, optionally handing it `data`
    ///
    /// Returns the payload of whoever next transfers control back here
    /// (this coroutine yielding, finishing, or any other coroutine
    /// resuming the caller).
    ///
    /// Fails without switching if the target is running (`Busy`), dead
    /// (`NotFound`), freed (`StaleHandle`), or if switching is denied
    /// (`Misuse`).
    pub fn resume(self, data: Option<Payload>) -> EngineResult<Option<Payload>> {
        let mut data = data;
        let result = switch_with(|engine, garbage| engine.begin_resume(self, &mut data, garbage));
        drop(data);
        record(result)
    }

    /// Free a coroutine that is not alive (never started, or finished
    /// with [`Builder::manual_close`])
    pub fn close(self) -> EngineResult<()> {
        let mut garbage = Default::default();
        let result = with_engine(|engine| engine.close(self, &mut garbage));
        drop(garbage);
        record(result)
    }

    pub fn id(self) -> EngineResult<CoroutineId> {
        self.inspect(|e| e.id)
    }

    pub fn state(self) -> EngineResult<CoroutineState> {
        self.inspect(|e| e.state)
    }

    pub fn flags(self) -> EngineResult<CoroutineFlags> {
        self.inspect(|e| e.flags)
    }

    /// Round stamped at the last switch into this coroutine
    pub fn round(self) -> EngineResult<u64> {
        self.inspect(|e| e.round)
    }

    /// Time since first resume (frozen once dead)
    pub fn elapsed(self) -> EngineResult<Duration> {
        self.inspect(|e| e.elapsed())
    }

    /// Usable stack bytes (0 for the main coroutine)
    pub fn stack_size(self) -> EngineResult<usize> {
        self.inspect(|e| e.stack_size)
    }

    /// Started and not yet finished
    pub fn is_alive(self) -> EngineResult<bool> {
        self.inspect(|e| e.is_alive())
    }

    /// Coroutine that last switched into this one
    pub fn switched_from(self) -> EngineResult<Option<Coroutine>> {
        self.inspect(|e| e.from)
    }

    /// Coroutine a yield from this one returns to
    pub fn previous(self) -> EngineResult<Option<Coroutine>> {
        self.inspect(|e| e.previous)
    }

    /// Coroutine this one resumed and that has not yielded back yet
    pub fn next(self) -> EngineResult<Option<Coroutine>> {
        self.inspect(|e| e.next)
    }

    /// Error the body ended with (a caught panic)
    pub fn error(self) -> EngineResult<Option<EngineError>> {
        self.inspect(|e| e.error.clone())
    }

    fn inspect<R>(self, f: impl FnOnce(&crate::engine::Entry) -> R) -> EngineResult<R> {
        with_engine(|engine| engine.entry(self).map(f))
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coroutine({}:{})", self.slot, self.generation)
    }
}

/// Coroutine factory with optional stack size and close mode
#[derive(Debug, Clone, Default)]
pub struct Builder {
    stack_size: usize,
    manual_close: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested stack size; 0 uses the engine default
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Keep the finished coroutine's slot until [`Coroutine::close`]
    pub fn manual_close(mut self, manual: bool) -> Self {
        self.manual_close = manual;
        self
    }

    pub fn spawn<F>(self, f: F) -> EngineResult<Coroutine>
    where
        F: FnOnce(Option<Payload>) -> Option<Payload> + 'static,
    {
        let flags = if self.manual_close {
            CoroutineFlags::MANUAL_CLOSE
        } else {
            CoroutineFlags::NONE
        };
        let body: Body = Box::new(f);
        record(with_engine(|engine| {
            engine.create(body, self.stack_size, flags, None)
        }))
    }
}

/// Suspend the current coroutine, handing `data` to the one that
/// receives control
///
/// Control goes to the coroutine that resumed this one, else to the
/// scheduler. With neither, fails with `Misuse` and does not switch.
pub fn yield_with(data: Option<Payload>) -> EngineResult<Option<Payload>> {
    let mut data = data;
    let result = switch_with(|engine, garbage| engine.begin_yield(&mut data, garbage));
    drop(data);
    record(result)
}

/// [`yield_with`] without a payload
#[inline]
pub fn yield_now() -> EngineResult<Option<Payload>> {
    yield_with(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use costack_core::ErrorKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_yield_value_to_resumer() {
        let co = Coroutine::create(|_| {
            yield_with(Some(Box::new(42u32))).unwrap();
            None
        })
        .unwrap();

        let got = co.resume(None).unwrap().unwrap();
        assert_eq!(*got.downcast::<u32>().unwrap(), 42);
        assert_eq!(co.state().unwrap(), CoroutineState::Waiting);

        assert!(co.resume(None).unwrap().is_none());
        // auto-freed once it died
        assert_eq!(co.state().unwrap_err().kind(), ErrorKind::StaleHandle);
    }

    #[test]
    fn test_first_resume_payload_is_argument() {
        let co = Coroutine::create(|data| {
            let n = *data.unwrap().downcast::<i64>().unwrap();
            Some(Box::new(n * 2))
        })
        .unwrap();
        let out = co.resume(Some(Box::new(21i64))).unwrap().unwrap();
        assert_eq!(*out.downcast::<i64>().unwrap(), 42);
    }

    #[test]
    fn test_resume_self_is_busy() {
        let result = Rc::new(RefCell::new(None));
        let seen = result.clone();
        let co = Coroutine::create(move |_| {
            let me = Coroutine::current();
            *seen.borrow_mut() = Some(me.resume(None).unwrap_err().kind());
            None
        })
        .unwrap();
        co.resume(None).unwrap();
        assert_eq!(*result.borrow(), Some(ErrorKind::Busy));
    }

    #[test]
    fn test_yield_from_main_without_target() {
        let err = yield_now().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Misuse);
        assert_eq!(crate::engine::last_error().unwrap().kind(), ErrorKind::Misuse);
        assert_eq!(Coroutine::current(), Coroutine::main());
    }

    #[test]
    fn test_manual_close() {
        let co = Coroutine::builder()
            .manual_close(true)
            .spawn(|_| None)
            .unwrap();
        co.resume(None).unwrap();
        assert_eq!(co.state().unwrap(), CoroutineState::Dead);
        assert!(!co.is_alive().unwrap());
        assert_eq!(
            co.resume(None).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        co.close().unwrap();
        assert_eq!(co.id().unwrap_err().kind(), ErrorKind::StaleHandle);
    }

    #[test]
    fn test_close_suspended_is_busy() {
        let co = Coroutine::create(|_| {
            yield_now().unwrap();
            None
        })
        .unwrap();
        co.resume(None).unwrap();
        assert_eq!(co.close().unwrap_err().kind(), ErrorKind::Busy);
        co.resume(None).unwrap();
    }

    #[test]
    fn test_close_never_started() {
        let before = crate::engine::stats().active;
        let co = Coroutine::create(|_| None).unwrap();
        assert_eq!(crate::engine::stats().active, before + 1);
        co.close().unwrap();
        assert_eq!(crate::engine::stats().active, before);
    }

    #[test]
    fn test_close_main_is_misuse() {
        assert_eq!(
            Coroutine::main().close().unwrap_err().kind(),
            ErrorKind::Misuse
        );
    }

    #[test]
    fn test_panic_is_contained() {
        let co = Coroutine::builder()
            .manual_close(true)
            .spawn(|_| panic!("boom"))
            .unwrap();
        assert!(co.resume(None).unwrap().is_none());
        let err = co.error().unwrap().unwrap();
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert!(err.message().contains("boom"));
        co.close().unwrap();
    }

    #[test]
    fn test_deny_switch() {
        let co = Coroutine::create(|_| None).unwrap();
        {
            let _guard = crate::engine::deny_switch();
            assert_eq!(co.resume(None).unwrap_err().kind(), ErrorKind::Misuse);
        }
        co.resume(None).unwrap();
    }

    #[test]
    fn test_ids_increase() {
        let a = Coroutine::create(|_| None).unwrap();
        let b = Coroutine::create(|_| None).unwrap();
        assert!(b.id().unwrap() > a.id().unwrap());
        assert_eq!(Coroutine::main().id().unwrap(), CoroutineId::MAIN);
        a.resume(None).unwrap();
        b.resume(None).unwrap();
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let a = Coroutine::create(|_| None).unwrap();
        a.resume(None).unwrap();
        let b = Coroutine::create(|_| None).unwrap();
        assert_eq!(a.slot(), b.slot());
        assert_ne!(a, b);
        b.resume(None).unwrap();
    }
}
