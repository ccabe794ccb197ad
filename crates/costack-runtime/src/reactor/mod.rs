//! Reactor installation and the reference poll(2) reactor
//!
//! The engine never owns an event loop. Whatever implements
//! [`costack_core::Reactor`] can be installed for the current thread; the
//! wait primitive arms its timers there and the scheduler ticks it.
//!
//! [`PollReactor`] is a small, complete backend: a binary-heap timer
//! queue plus `poll(2)` over registered fds, and a [`Remote`] handle other
//! threads use to post work into the loop.

mod poll;
mod timer;

pub use poll::{PollReactor, Remote};
pub use timer::{TimerHeap, TimerHeapStats};

use costack_core::{kdebug, Reactor};
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    static CURRENT: RefCell<Option<Rc<dyn Reactor>>> = const { RefCell::new(None) };
}

/// Make `reactor` the current thread's reactor, returning the previous one
pub fn install(reactor: Rc<dyn Reactor>) -> Option<Rc<dyn Reactor>> {
    kdebug!("installing {} reactor", reactor.name());
    CURRENT.with(|cell| cell.borrow_mut().replace(reactor))
}

/// The current thread's reactor, if one is installed
pub fn current() -> Option<Rc<dyn Reactor>> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Remove the current thread's reactor
pub fn uninstall() -> Option<Rc<dyn Reactor>> {
    CURRENT.with(|cell| cell.borrow_mut().take())
}

/// Install a fresh [`PollReactor`] unless a reactor is already installed
pub fn install_default() -> std::io::Result<Rc<dyn Reactor>> {
    if let Some(existing) = current() {
        return Ok(existing);
    }
    let reactor: Rc<dyn Reactor> = Rc::new(PollReactor::new()?);
    install(Rc::clone(&reactor));
    Ok(reactor)
}
