//! # costack-runtime
//!
//! Platform-specific runtime for the costack coroutine engine.
//!
//! This crate provides:
//! - Stack memory (mmap with guard page, or heap)
//! - Context switching (architecture-specific assembly)
//! - The per-thread engine: coroutine arena, resume/yield, deferred free
//! - The scheduler coroutine and its deadlock policy
//! - The wait/timeout primitive, wait groups and fd readiness waits
//! - A reference `poll(2)` reactor with a timer heap
//! - The watchdog thread

pub mod config;
pub mod memory;
pub mod arch;
mod tls;
pub mod engine;
pub mod coroutine;
pub mod wait;
pub mod reactor;
pub mod scheduler;
pub mod sync;
pub mod io;
pub mod parking;
pub mod watchdog;

// Re-exports
pub use config::{AllocFailurePolicy, DeadlockPolicy, EngineConfig, StackAllocator};
pub use coroutine::{yield_now, yield_with, Builder, Coroutine};
pub use engine::{EngineSnapshot, EngineStats, SwitchGuard};
pub use scheduler::{scheduler_close, scheduler_run, SchedulerHooks};
pub use wait::{sleep, wait, wait_all, wait_for, wait_ms, WaitTicket, WakeReason};
pub use sync::WaitGroup;
pub use io::FdWaiter;
pub use reactor::{PollReactor, Remote};
pub use watchdog::{Watchdog, WatchdogAlert, WatchdogConfig};

#[cfg(not(unix))]
compile_error!("costack-runtime supports unix targets only");
