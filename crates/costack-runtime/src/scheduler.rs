//! Scheduler coroutine
//!
//! A distinguished coroutine (id 0) that drives the reactor. Coroutines
//! with nowhere else to yield land here; the scheduler ticks the event
//! loop, whose callbacks resume them again.
//!
//! When the reactor has nothing armed the scheduler looks at who is
//! still running. If only `wait_all` waiters remain, they are woken.
//! Otherwise nothing can ever make progress (a deadlock): the deadlock
//! hook gets one chance, then the configured [`DeadlockPolicy`] applies.

use crate::config::DeadlockPolicy;
use crate::coroutine::{yield_now, Coroutine};
use crate::engine::Body;
use crate::reactor;
use crate::tls::{record, with_engine};
use crate::wait::{
    deadlock_wakeup, fail_waiters_on_deadlock, only_waiters_left, wait_all, wake_all_waiters,
};
use costack_core::{
    kdebug, kerror, kinfo, kwarn, CoroutineFlags, CoroutineId, EngineError, EngineResult,
    ErrorKind, Payload, Reactor,
};
use std::rc::Rc;
use std::thread;

/// Callbacks the scheduler coroutine runs on
pub struct SchedulerHooks {
    schedule: Box<dyn FnMut() -> bool>,
    deadlock: Option<Box<dyn FnMut()>>,
    policy: Option<DeadlockPolicy>,
}

impl SchedulerHooks {
    /// Hooks around a tick function
    ///
    /// `schedule` runs one event-loop iteration and returns whether work
    /// is still pending.
    pub fn new<F>(schedule: F) -> Self
    where
        F: FnMut() -> bool + 'static,
    {
        Self {
            schedule: Box::new(schedule),
            deadlock: None,
            policy: None,
        }
    }

    /// Hooks ticking `reactor`, which also becomes the thread's reactor
    pub fn from_reactor(reactor: Rc<dyn Reactor>) -> Self {
        reactor::install(Rc::clone(&reactor));
        Self::new(move || reactor.run_once())
    }

    /// Called once per deadlock before the policy applies
    pub fn on_deadlock<F>(mut self, f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        self.deadlock = Some(Box::new(f));
        self
    }

    /// Override the engine's configured deadlock policy
    pub fn policy(mut self, policy: DeadlockPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// The registered scheduler coroutine, if any
pub fn current() -> Option<Coroutine> {
    with_engine(|engine| engine.scheduler())
}

pub fn is_running() -> bool {
    current().is_some()
}

/// Start the scheduler coroutine on this thread
///
/// The scheduler registers itself and yields straight back, so this
/// returns once it is ready. A second scheduler is `Misuse`.
pub fn scheduler_run(hooks: SchedulerHooks) -> EngineResult<Coroutine> {
    record(run_inner(hooks))
}

fn run_inner(hooks: SchedulerHooks) -> EngineResult<Coroutine> {
    if let Some(existing) = current() {
        return Err(EngineError::misuse(format!(
            "a scheduler is already running ({:?})",
            existing
        )));
    }

    let body: Body = Box::new(move |_| scheduler_main(hooks));
    let co = with_engine(|engine| {
        engine.create(body, 0, CoroutineFlags::NONE, Some(CoroutineId::SCHEDULER))
    })?;
    co.resume(None)?;

    if current() != Some(co) {
        return Err(EngineError::misuse("scheduler failed to register"));
    }
    kinfo!("scheduler running");
    Ok(co)
}

/// Stop the scheduler once every other coroutine has finished
///
/// Parks the caller in [`wait_all`] until only waiters remain, then stops
/// the scheduler and checks that it unregistered. `Misuse` when no
/// scheduler runs or when called from the scheduler itself.
pub fn scheduler_close() -> EngineResult<()> {
    record(close_inner())
}

fn close_inner() -> EngineResult<()> {
    let scheduler = with_engine(|engine| match engine.scheduler() {
        None => Err(EngineError::misuse("no scheduler is running")),
        Some(s) if s == engine.current() => {
            Err(EngineError::misuse("the scheduler cannot close itself"))
        }
        Some(s) => Ok(s),
    })?;

    while !only_waiters_left() {
        wait_all(None)?;
    }

    with_engine(|engine| engine.scheduler_stop = true);
    scheduler.resume(None)?;

    if current().is_some() {
        return Err(EngineError::misuse("scheduler did not unregister"));
    }
    kinfo!("scheduler closed");
    Ok(())
}

fn stop_requested() -> bool {
    with_engine(|engine| engine.scheduler_stop)
}

/// Coroutines neither finished nor parked in `wait_all`
fn running_count() -> usize {
    with_engine(|engine| engine.active_count().saturating_sub(engine.waiters.len()))
}

/// Scheduler body; its return value goes to the coroutine that receives
/// control when it finishes (main, parked in `wait_all`, on deadlock)
fn scheduler_main(mut hooks: SchedulerHooks) -> Option<Payload> {
    if let Err(e) = with_engine(|engine| engine.register_scheduler()) {
        kerror!("scheduler registration failed: {}", e);
        return None;
    }
    let (policy, poll_interval) = with_engine(|engine| {
        let config = engine.config();
        (
            hooks.policy.unwrap_or(config.deadlock_policy),
            config.deadlock_poll_interval,
        )
    });

    // Hand control back to whoever started us
    if let Err(e) = yield_now() {
        kerror!("scheduler could not return to its creator: {}", e);
    }

    let mut deadlock_hook_tried = false;
    let mut outcome = None;
    loop {
        if stop_requested() {
            break;
        }
        let pending = (hooks.schedule)();
        if stop_requested() {
            break;
        }
        if pending {
            deadlock_hook_tried = false;
            continue;
        }

        let running = running_count();
        if running == 0 {
            wake_all_waiters();
            continue;
        }

        if !deadlock_hook_tried {
            deadlock_hook_tried = true;
            if let Some(hook) = hooks.deadlock.as_mut() {
                kwarn!(
                    "{} coroutine(s) blocked with no pending events, calling deadlock hook",
                    running
                );
                hook();
                continue;
            }
        }

        match policy {
            DeadlockPolicy::ReturnError => {
                kerror!(
                    "deadlock: {} coroutine(s) blocked with no pending events, stopping scheduler",
                    running
                );
                with_engine(|engine| {
                    engine.set_last_error(EngineError::new(
                        ErrorKind::Deadlock,
                        format!("{} coroutine(s) can never be resumed", running),
                    ));
                });
                let failed = fail_waiters_on_deadlock();
                kdebug!("{} parked wait(s) failed with deadlock", failed);
                if main_is_parked() {
                    outcome = Some(deadlock_wakeup());
                }
                break;
            }
            DeadlockPolicy::Block => {
                kerror!(
                    "deadlock: {} coroutine(s) blocked with no pending events, waiting for progress",
                    running
                );
                if !block_until_progress(&mut hooks, poll_interval) {
                    break;
                }
                deadlock_hook_tried = false;
            }
        }
    }

    with_engine(|engine| engine.unregister_scheduler());
    kdebug!("scheduler finished");
    outcome
}

fn main_is_parked() -> bool {
    with_engine(|engine| {
        engine
            .entry(engine.main())
            .map(|main| main.wait_parked)
            .unwrap_or(false)
    })
}

/// Re-tick every `interval` until something moves; `false` on stop
fn block_until_progress(hooks: &mut SchedulerHooks, interval: std::time::Duration) -> bool {
    let round = crate::engine::stats().round;
    loop {
        thread::sleep(interval);
        if stop_requested() {
            return false;
        }
        let pending = (hooks.schedule)();
        if stop_requested() {
            return false;
        }
        if pending || running_count() == 0 || crate::engine::stats().round != round {
            kinfo!("progress after deadlock, resuming normal scheduling");
            return true;
        }
    }
}
