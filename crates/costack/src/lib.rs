//! # costack - cooperative stackful coroutines
//!
//! Blocking-looking code on top of an event loop. A coroutine that would
//! block arms the reactor and yields; the scheduler coroutine ticks the
//! reactor, and the callback resumes the coroutine right where it left
//! off.
//!
//! ## Features
//!
//! - **Stackful**: every coroutine owns an mmap'd stack (guard page in debug builds)
//! - **Fast Context Switch**: hand-written assembly for x86_64 and aarch64
//! - **Explicit data transfer**: `resume(data)` / `yield_with(data)` move payloads
//! - **Timeouts everywhere**: every wait takes an optional timeout
//! - **Deadlock detection**: the scheduler notices when nothing can progress
//! - **Watchdog**: a second OS thread alerts when a coroutine hogs the thread
//!
//! ## Quick Start
//!
//! ```ignore
//! use costack::{Runtime, spawn, sleep};
//! use std::time::Duration;
//!
//! fn main() -> costack::EngineResult<()> {
//!     Runtime::new()?.block_on(|| {
//!         spawn(|_| {
//!             sleep(Duration::from_millis(10)).ok();
//!             println!("woke up");
//!             None
//!         })
//!         .ok();
//!     })
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        spawn(), resume(), yield_with(), wait(), sleep()      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Scheduler coroutine (id 0)                  │
//! │          reactor tick, wait-all waiters, deadlock           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌───────────────┐                     ┌───────────────┐
//!    │    Reactor    │                     │   Watchdog    │
//!    │ poll + timers │                     │   OS thread   │
//!    └───────────────┘                     └───────────────┘
//!          │
//!          ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │        Per-thread engine: arena, stacks, contexts       │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use costack_core::{
    CoroutineFlags, CoroutineId, CoroutineState, EngineError, EngineResult, ErrorKind, Interest,
    Payload, Reactor,
};

// Re-export kprint macros for debug logging
pub use costack_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use costack_core::kprint::{
    init as init_logging, set_flush_enabled, set_log_level, set_time_enabled, LogLevel,
};

// Re-export env utilities
pub use costack_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use costack_runtime::{
    engine, io, reactor, scheduler, wait, watchdog, AllocFailurePolicy, Builder, Coroutine,
    DeadlockPolicy, EngineConfig, FdWaiter, PollReactor, SchedulerHooks, StackAllocator,
    WaitGroup, WaitTicket, Watchdog, WatchdogAlert, WatchdogConfig,
};
pub use costack_runtime::{
    scheduler_close, scheduler_run, sleep, wait_all, wait_for, wait_ms, yield_now, yield_with,
};

use std::cell::RefCell;
use std::rc::Rc;

/// Scheduler + reactor for the current thread
///
/// Created with a running scheduler ticking a [`PollReactor`]; dropping
/// or [`shutdown`](Self::shutdown) waits for every coroutine to finish
/// and closes the scheduler.
pub struct Runtime {
    reactor: Rc<PollReactor>,
    watchdog: Option<Watchdog>,
    running: bool,
}

/// Options for [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<EngineConfig>,
    policy: Option<DeadlockPolicy>,
    on_deadlock: Option<Box<dyn FnMut()>>,
    watchdog: Option<WatchdogConfig>,
}

impl RuntimeBuilder {
    /// Engine configuration; applied only if the thread's engine does
    /// not exist yet
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn deadlock_policy(mut self, policy: DeadlockPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn on_deadlock<F>(mut self, f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        self.on_deadlock = Some(Box::new(f));
        self
    }

    /// Also watch the engine from a watchdog thread
    pub fn watchdog(mut self, config: WatchdogConfig) -> Self {
        self.watchdog = Some(config);
        self
    }

    pub fn build(self) -> EngineResult<Runtime> {
        if let Some(config) = self.config {
            engine::init(config)?;
        }
        let reactor = Rc::new(
            PollReactor::new().map_err(|e| EngineError::syscall("creating the poll reactor", e))?,
        );

        let mut hooks = SchedulerHooks::from_reactor(reactor.clone());
        if let Some(policy) = self.policy {
            hooks = hooks.policy(policy);
        }
        if let Some(mut f) = self.on_deadlock {
            hooks = hooks.on_deadlock(move || f());
        }
        if let Err(e) = scheduler_run(hooks) {
            reactor::uninstall();
            return Err(e);
        }

        let watchdog = match self.watchdog.map(Watchdog::start).transpose() {
            Ok(watchdog) => watchdog,
            Err(e) => {
                // undo the scheduler; nothing else runs yet
                let _ = scheduler_close();
                reactor::uninstall();
                return Err(e);
            }
        };

        Ok(Runtime {
            reactor,
            watchdog,
            running: true,
        })
    }
}

impl Runtime {
    /// Runtime with default options
    pub fn new() -> EngineResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// The reactor the scheduler ticks
    pub fn reactor(&self) -> &Rc<PollReactor> {
        &self.reactor
    }

    /// Run `f` in a coroutine, wait for every coroutine to finish, then
    /// shut the runtime down and return `f`'s result
    pub fn block_on<F, T>(mut self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> T + 'static,
        T: 'static,
    {
        let out: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let slot = out.clone();
        let root = Coroutine::create(move |_| {
            *slot.borrow_mut() = Some(f());
            None
        })?;
        root.resume(None)?;
        self.shutdown()?;

        let value = out.borrow_mut().take();
        value.ok_or_else(|| EngineError::new(ErrorKind::Canceled, "root coroutine did not finish"))
    }

    /// Wait for every coroutine, close the scheduler, stop the watchdog
    pub fn shutdown(&mut self) -> EngineResult<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        let result = scheduler_close();
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        reactor::uninstall();
        result
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            kerror!("runtime shutdown failed: {}", e);
        }
    }
}

/// Create a coroutine and run it until it first suspends
///
/// The Go-style `go f()`: the caller continues once the new coroutine
/// yields, waits, or finishes.
pub fn spawn<F>(f: F) -> EngineResult<Coroutine>
where
    F: FnOnce(Option<Payload>) -> Option<Payload> + 'static,
{
    let co = Coroutine::create(f)?;
    co.resume(None)?;
    Ok(co)
}

/// Id of the running coroutine
#[inline]
pub fn current_id() -> CoroutineId {
    Coroutine::current().id().unwrap_or(CoroutineId::NONE)
}

/// Check if the caller runs on a coroutine stack (not the thread's own)
#[inline]
pub fn is_in_coroutine() -> bool {
    Coroutine::current() != Coroutine::main()
}
