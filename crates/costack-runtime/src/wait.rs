//! Wait/timeout primitive
//!
//! Every blocking-looking operation is built the same way:
//!
//! 1. [`arm`] a ticket for the current coroutine and hand it to exactly
//!    one completion source (a reactor callback, a wait-group, ...)
//! 2. call [`wait_for`], which optionally arms a reactor timer and yields
//! 3. the first of completion, cancellation or timer resumes the
//!    coroutine; every later delivery finds the ticket stale and does
//!    nothing
//!
//! A ticket resumes its coroutine only while that coroutine is parked on
//! that exact ticket, so a suspended coroutine is resumed exactly once,
//! by exactly one path, and never by a stale completion.

use crate::coroutine::{yield_now, Coroutine};
use crate::reactor;
use crate::tls::{record, with_engine};
use costack_core::{kerror, ktrace, EngineError, EngineResult, ErrorKind, Payload, TimerHandle};
use std::rc::Rc;
use std::time::Duration;

/// Why a parked coroutine was woken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Completed,
    TimedOut,
    Canceled,
    /// The scheduler gave up on a deadlock
    Deadlock,
}

/// Payload a ticket delivers to its parked coroutine
pub(crate) struct Wakeup {
    reason: WakeReason,
    data: Option<Payload>,
}

/// One-shot right to wake a coroutine from its current wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTicket {
    coroutine: Coroutine,
    seq: u64,
}

enum Route {
    Stale,
    Early,
    Resume,
}

impl WaitTicket {
    /// Coroutine this ticket wakes
    #[inline]
    pub fn coroutine(&self) -> Coroutine {
        self.coroutine
    }

    /// Check if the ticket still wakes its coroutine
    pub fn is_pending(&self) -> bool {
        with_engine(|engine| {
            engine
                .entry(self.coroutine)
                .map(|e| e.waiting_on == Some(self.seq))
                .unwrap_or(false)
        })
    }

    /// Wake the coroutine with a successful result
    ///
    /// Returns `false` if the ticket is stale.
    pub fn complete(self, data: Option<Payload>) -> bool {
        self.deliver(WakeReason::Completed, data)
    }

    /// Wake the coroutine with `ErrorKind::Canceled`
    pub fn cancel(self) -> bool {
        self.deliver(WakeReason::Canceled, None)
    }

    pub(crate) fn time_out(self) -> bool {
        self.deliver(WakeReason::TimedOut, None)
    }

    fn deliver(self, reason: WakeReason, data: Option<Payload>) -> bool {
        let mut wakeup = Some(Wakeup { reason, data });
        let route = with_engine(|engine| {
            let Ok(entry) = engine.entry_mut(self.coroutine) else {
                return Route::Stale;
            };
            if entry.waiting_on != Some(self.seq) {
                return Route::Stale;
            }
            entry.waiting_on = None;
            if entry.wait_parked && entry.state.is_resumable() {
                Route::Resume
            } else {
                // Completed before the waiter got to park; wait_for picks it up
                entry.early_wake = wakeup.take();
                Route::Early
            }
        });

        match route {
            Route::Stale => false,
            Route::Early => true,
            Route::Resume => {
                ktrace!("waking {:?}: {:?}", self.coroutine, reason);
                let payload = wakeup.map(|w| Box::new(w) as Payload);
                match self.coroutine.resume(payload) {
                    Ok(_) => true,
                    Err(e) => {
                        kerror!("failed to wake {:?}: {}", self.coroutine, e);
                        false
                    }
                }
            }
        }
    }
}

/// Arm a fresh wait for the current coroutine
///
/// Any ticket armed earlier by the same coroutine becomes stale.
pub fn arm() -> EngineResult<WaitTicket> {
    record(with_engine(|engine| {
        let coroutine = engine.current();
        let entry = engine.entry_mut(coroutine)?;
        entry.wait_seq += 1;
        entry.waiting_on = Some(entry.wait_seq);
        entry.early_wake = None;
        Ok(WaitTicket {
            coroutine,
            seq: entry.wait_seq,
        })
    }))
}

fn interpret(payload: Option<Payload>) -> EngineResult<Option<Payload>> {
    match payload.map(|p| p.downcast::<Wakeup>()) {
        Some(Ok(wakeup)) => wakeup_result(*wakeup),
        // A plain resume of a parked coroutine counts as completion
        Some(Err(other)) => Ok(Some(other)),
        None => Ok(None),
    }
}

fn wakeup_result(wakeup: Wakeup) -> EngineResult<Option<Payload>> {
    match wakeup.reason {
        WakeReason::Completed => Ok(wakeup.data),
        WakeReason::TimedOut => Err(EngineError::timed_out("wait timed out")),
        WakeReason::Canceled => Err(EngineError::canceled("wait was canceled")),
        WakeReason::Deadlock => Err(EngineError::new(
            ErrorKind::Deadlock,
            "scheduler stopped on deadlock",
        )),
    }
}

/// Park the current coroutine until its armed ticket fires or `timeout`
/// passes (`None` waits forever)
///
/// Arms a ticket first if none is armed. A timeout needs an installed
/// reactor. Returns the completion payload, or `TimedOut`, `Canceled`,
/// `Deadlock`, or the yield error.
pub fn wait_for(timeout: Option<Duration>) -> EngineResult<Option<Payload>> {
    record(wait_inner(timeout))
}

fn wait_inner(timeout: Option<Duration>) -> EngineResult<Option<Payload>> {
    let (ticket, early) = with_engine(|engine| -> EngineResult<_> {
        let coroutine = engine.current();
        let entry = engine.entry_mut(coroutine)?;
        if let Some(wakeup) = entry.early_wake.take() {
            return Ok((None, Some(wakeup)));
        }
        let seq = match entry.waiting_on {
            Some(seq) => seq,
            None => {
                entry.wait_seq += 1;
                entry.waiting_on = Some(entry.wait_seq);
                entry.wait_seq
            }
        };
        entry.wait_parked = true;
        Ok((Some(WaitTicket { coroutine, seq }), None))
    })?;

    let Some(ticket) = ticket else {
        return match early {
            Some(wakeup) => wakeup_result(wakeup),
            None => Ok(None),
        };
    };

    let timer = match timeout {
        Some(after) => match arm_timer(ticket, after) {
            Ok(timer) => Some(timer),
            Err(e) => {
                unpark(ticket);
                return Err(e);
            }
        },
        None => None,
    };

    let result = yield_now();

    if let Some((reactor, handle)) = timer {
        reactor.cancel_timer(handle);
    }
    unpark(ticket);
    interpret(result?)
}

fn arm_timer(
    ticket: WaitTicket,
    after: Duration,
) -> EngineResult<(Rc<dyn costack_core::Reactor>, TimerHandle)> {
    let reactor = reactor::current().ok_or_else(|| {
        EngineError::misuse("a timed wait needs a reactor installed on this thread")
    })?;
    let handle = reactor.add_timer(
        after,
        Box::new(move || {
            ticket.time_out();
        }),
    );
    Ok((reactor, handle))
}

/// Clear the parked state
fn unpark(ticket: WaitTicket) {
    with_engine(|engine| {
        if let Ok(entry) = engine.entry_mut(ticket.coroutine) {
            entry.wait_parked = false;
            if entry.waiting_on == Some(ticket.seq) {
                entry.waiting_on = None;
            }
        }
    })
}

/// Wait until completion (`true`) or failure (`false`)
///
/// The failure reason is available from [`crate::engine::last_error`].
pub fn wait(timeout: Option<Duration>) -> bool {
    wait_for(timeout).is_ok()
}

/// [`wait`] with a millisecond timeout; negative waits forever
pub fn wait_ms(timeout_ms: i64) -> bool {
    let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
    wait(timeout)
}

/// Suspend the current coroutine for `duration`
///
/// An early completion of the sleep's own ticket also ends it; a
/// cancellation is returned as an error.
pub fn sleep(duration: Duration) -> EngineResult<()> {
    arm()?;
    match wait_for(Some(duration)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::TimedOut => {
            with_engine(|engine| engine.clear_last_error());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Park until every other coroutine has finished or is parked here too
///
/// Woken by the scheduler when it finds nothing else running. Returns
/// immediately when nothing else is running already.
pub fn wait_all(timeout: Option<Duration>) -> EngineResult<()> {
    record(wait_all_inner(timeout))
}

/// Nothing runs besides the caller and coroutines parked in `wait_all`
pub(crate) fn only_waiters_left() -> bool {
    with_engine(|engine| engine.active_count() <= engine.waiters.len() + 1)
}

fn wait_all_inner(timeout: Option<Duration>) -> EngineResult<()> {
    if only_waiters_left() {
        return Ok(());
    }
    let coroutine = with_engine(|engine| -> EngineResult<Coroutine> {
        let current = engine.current();
        match engine.scheduler() {
            None => Err(EngineError::misuse("wait_all needs a running scheduler")),
            Some(s) if s == current => Err(EngineError::misuse(
                "the scheduler cannot wait for itself",
            )),
            Some(_) => Ok(current),
        }
    })?;

    let ticket = arm()?;
    with_engine(|engine| engine.waiters.push_back(ticket));
    let result = wait_inner(timeout);
    with_engine(|engine| engine.waiters.retain(|w| w.coroutine() != coroutine));
    result.map(|_| ())
}

/// Wake every coroutine parked in [`wait_all`], oldest first
pub(crate) fn wake_all_waiters() -> usize {
    let tickets: Vec<WaitTicket> = with_engine(|engine| engine.waiters.drain(..).collect());
    let mut woken = 0;
    for ticket in tickets {
        if ticket.complete(None) {
            woken += 1;
        }
    }
    woken
}

/// Fail every parked wait except the main coroutine's with `Deadlock`
///
/// Covers `wait_all` waiters and plain `wait`/`wait_for` callers alike.
/// Main is left parked; the finishing scheduler hands it
/// [`deadlock_wakeup`] instead.
pub(crate) fn fail_waiters_on_deadlock() -> usize {
    let tickets: Vec<WaitTicket> = with_engine(|engine| {
        let main = engine.main();
        engine
            .parked_waits()
            .into_iter()
            .filter(|(co, _)| *co != main)
            .map(|(coroutine, seq)| WaitTicket { coroutine, seq })
            .collect()
    });
    tickets
        .into_iter()
        .filter(|t| t.deliver(WakeReason::Deadlock, None))
        .count()
}

/// Payload that ends a wait with `Deadlock` when switched into it directly
pub(crate) fn deadlock_wakeup() -> Payload {
    Box::new(Wakeup {
        reason: WakeReason::Deadlock,
        data: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_ticket_completes_parked_coroutine() {
        let slot: Rc<Cell<Option<WaitTicket>>> = Rc::new(Cell::new(None));
        let outcome = Rc::new(Cell::new(0u32));

        let (s, o) = (slot.clone(), outcome.clone());
        let co = Coroutine::create(move |_| {
            s.set(Some(arm().unwrap()));
            let data = wait_for(None).unwrap().unwrap();
            o.set(*data.downcast::<u32>().unwrap());
            None
        })
        .unwrap();

        co.resume(None).unwrap();
        let ticket = slot.get().unwrap();
        assert!(ticket.is_pending());
        assert!(ticket.complete(Some(Box::new(7u32))));
        assert_eq!(outcome.get(), 7);
        // second delivery through the same ticket is a no-op
        assert!(!ticket.cancel());
    }

    #[test]
    fn test_cancel_reports_canceled() {
        let slot: Rc<Cell<Option<WaitTicket>>> = Rc::new(Cell::new(None));
        let kind = Rc::new(Cell::new(None));

        let (s, k) = (slot.clone(), kind.clone());
        let co = Coroutine::create(move |_| {
            s.set(Some(arm().unwrap()));
            k.set(Some(wait_for(None).unwrap_err().kind()));
            None
        })
        .unwrap();

        co.resume(None).unwrap();
        assert!(slot.get().unwrap().cancel());
        assert_eq!(kind.get(), Some(ErrorKind::Canceled));
    }

    #[test]
    fn test_completion_before_park_is_kept() {
        let ticket = arm().unwrap();
        assert!(ticket.complete(Some(Box::new("early"))));
        let data = wait_for(None).unwrap().unwrap();
        assert_eq!(*data.downcast::<&str>().unwrap(), "early");
    }

    #[test]
    fn test_rearm_makes_old_ticket_stale() {
        let old = arm().unwrap();
        let _new = arm().unwrap();
        assert!(!old.is_pending());
        assert!(!old.complete(None));
    }

    #[test]
    fn test_timed_wait_without_reactor() {
        reactor::uninstall();
        let co = Coroutine::create(|_| {
            assert!(!wait_ms(10));
            assert_eq!(
                crate::engine::last_error().unwrap().kind(),
                ErrorKind::Misuse
            );
            None
        })
        .unwrap();
        co.resume(None).unwrap();
    }

    #[test]
    fn test_wait_from_main_has_nowhere_to_go() {
        assert!(!wait(None));
        assert_eq!(
            crate::engine::last_error().unwrap().kind(),
            ErrorKind::Misuse
        );
    }
}
