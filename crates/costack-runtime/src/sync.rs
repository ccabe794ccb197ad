//! Coroutine-aware synchronization on top of the wait primitive

use crate::tls::record;
use crate::wait::{arm, wait_for, WaitTicket};
use costack_core::{ktrace, EngineError, EngineResult};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    count: usize,
    waiter: Option<WaitTicket>,
}

/// Counter a coroutine can wait on until it drops to zero
///
/// Clones share the same counter. One coroutine may wait at a time.
///
/// ```ignore
/// let wg = WaitGroup::new();
/// wg.add(2)?;
/// // ... two coroutines call wg.done() when finished
/// wg.wait(None)?;
/// ```
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Rc<RefCell<Inner>>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding count
    pub fn count(&self) -> usize {
        self.inner.borrow().count
    }

    /// Adjust the counter by `delta`
    ///
    /// `Misuse` while a wait is outstanding or if the counter would go
    /// negative; the counter is left unchanged.
    pub fn add(&self, delta: isize) -> EngineResult<()> {
        record(self.add_inner(delta))
    }

    fn add_inner(&self, delta: isize) -> EngineResult<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.waiter.is_some() {
            return Err(EngineError::misuse("wait group add while a wait is outstanding"));
        }
        let next = inner
            .count
            .checked_add_signed(delta)
            .ok_or_else(|| EngineError::misuse("wait group counter would go negative"))?;
        inner.count = next;
        Ok(())
    }

    /// Decrement the counter, waking the waiter when it reaches zero
    ///
    /// `Misuse` at zero; the counter stays at zero.
    pub fn done(&self) -> EngineResult<()> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if inner.count == 0 {
                drop(inner);
                return record(Err(EngineError::misuse(
                    "wait group done() with a zero counter",
                )));
            }
            inner.count -= 1;
            if inner.count == 0 {
                inner.waiter.take()
            } else {
                None
            }
        };
        if let Some(ticket) = waiter {
            ktrace!("wait group drained, waking {:?}", ticket.coroutine());
            ticket.complete(None);
        }
        Ok(())
    }

    /// Park the current coroutine until the counter reaches zero
    ///
    /// Returns at once if it already is zero. `Busy` when another
    /// coroutine is waiting, `TimedOut` after `timeout`, and `Canceled`
    /// if woken any other way before the counter drained.
    pub fn wait(&self, timeout: Option<Duration>) -> EngineResult<()> {
        record(self.wait_inner(timeout))
    }

    fn wait_inner(&self, timeout: Option<Duration>) -> EngineResult<()> {
        let ticket = {
            let inner = self.inner.borrow();
            if inner.count == 0 {
                return Ok(());
            }
            if inner.waiter.is_some() {
                return Err(EngineError::busy("wait group already has a waiter"));
            }
            drop(inner);
            let ticket = arm()?;
            self.inner.borrow_mut().waiter = Some(ticket);
            ticket
        };

        let result = wait_for(timeout);

        let count = {
            let mut inner = self.inner.borrow_mut();
            if inner.waiter == Some(ticket) {
                inner.waiter = None;
            }
            inner.count
        };
        result?;
        if count != 0 {
            return Err(EngineError::canceled(format!(
                "wait group woken with {} outstanding",
                count
            )));
        }
        Ok(())
    }

    /// Wake a parked waiter with `Canceled`; `false` if none was parked
    pub fn cancel(&self) -> bool {
        let waiter = self.inner.borrow_mut().waiter.take();
        match waiter {
            Some(ticket) => ticket.cancel(),
            None => false,
        }
    }
}
