//! File-descriptor readiness waits
//!
//! [`FdWaiter`] is the smallest resource wrapper over the wait primitive:
//! it arms one reactor fd interest, parks the caller, and is resumed by
//! the readiness callback, the wait timeout, or [`FdWaiter::close`].

use crate::reactor;
use crate::tls::record;
use crate::wait::{arm, wait_for, WaitTicket};
use costack_core::{kdebug, EngineError, EngineResult, Interest, IoHandle, Reactor};
use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

struct Parked {
    ticket: WaitTicket,
    io: IoHandle,
    reactor: Rc<dyn Reactor>,
}

/// Readiness waiter for one raw fd
///
/// The fd is not owned; closing the waiter only wakes a parked
/// coroutine with `Canceled` and refuses further waits.
pub struct FdWaiter {
    fd: RawFd,
    parked: RefCell<Option<Parked>>,
    closed: Cell<bool>,
}

impl FdWaiter {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            parked: RefCell::new(None),
            closed: Cell::new(false),
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Park until the fd reports any of `interest`
    ///
    /// Returns the readiness seen (possibly including
    /// [`Interest::ERROR`]). Fails with `TimedOut`, `Canceled` (closed
    /// while parked), `Busy` (another coroutine already waits here) or
    /// `Misuse` (closed, or no reactor installed).
    pub fn wait(&self, interest: Interest, timeout: Option<Duration>) -> EngineResult<Interest> {
        record(self.wait_inner(interest, timeout))
    }

    fn wait_inner(&self, interest: Interest, timeout: Option<Duration>) -> EngineResult<Interest> {
        if self.closed.get() {
            return Err(EngineError::misuse(format!("fd {} waiter is closed", self.fd)));
        }
        if self.parked.borrow().is_some() {
            return Err(EngineError::busy(format!(
                "a coroutine is already waiting on fd {}",
                self.fd
            )));
        }
        let reactor = reactor::current().ok_or_else(|| {
            EngineError::misuse("fd waits need a reactor installed on this thread")
        })?;

        let ticket = arm()?;
        let io = reactor.add_io(
            self.fd,
            interest,
            Box::new(move |ready| {
                ticket.complete(Some(Box::new(ready)));
            }),
        );
        *self.parked.borrow_mut() = Some(Parked {
            ticket,
            io,
            reactor: Rc::clone(&reactor),
        });

        let result = wait_for(timeout);

        // Timeout or cancel leaves the interest armed
        let parked = self.parked.borrow_mut().take();
        if let Some(parked) = parked {
            parked.reactor.cancel_io(parked.io);
        }

        let payload = result?;
        Ok(payload
            .and_then(|p| p.downcast::<Interest>().ok())
            .map(|ready| *ready)
            .unwrap_or(Interest::NONE))
    }

    /// Wake a parked waiter with `Canceled` and refuse later waits
    ///
    /// Returns `true` if a coroutine was woken.
    pub fn close(&self) -> bool {
        self.closed.set(true);
        let parked = self.parked.borrow_mut().take();
        match parked {
            Some(parked) => {
                kdebug!("fd {} closed with a waiter parked", self.fd);
                parked.reactor.cancel_io(parked.io);
                let ticket = parked.ticket;
                drop(parked);
                ticket.cancel()
            }
            None => false,
        }
    }
}

impl Drop for FdWaiter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Park until `fd` is readable
pub fn wait_readable(fd: RawFd, timeout: Option<Duration>) -> EngineResult<Interest> {
    FdWaiter::new(fd).wait(Interest::READABLE, timeout)
}

/// Park until `fd` is writable
pub fn wait_writable(fd: RawFd, timeout: Option<Duration>) -> EngineResult<Interest> {
    FdWaiter::new(fd).wait(Interest::WRITABLE, timeout)
}
