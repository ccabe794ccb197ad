//! Engine configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls on [`EngineConfig`]
//! 2. Environment variables (runtime)
//! 3. User's costack_config.rs (compile-time, via `COSTACK_CONFIG_RS`)
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use costack_runtime::config::{EngineConfig, StackAllocator};
//!
//! let config = EngineConfig::from_env()
//!     .default_stack_size(128 * 1024)
//!     .stack_allocator(StackAllocator::Heap);
//! costack_runtime::engine::init(config)?;
//! ```

pub mod defaults;

use costack_core::constants::{MAX_STACK_SIZE, MIN_STACK_SIZE};
use costack_core::env::{env_get, env_get_bool, env_get_duration_ms, env_get_opt};
use costack_core::{EngineError, EngineResult, ErrorKind};
use std::time::Duration;

/// Where coroutine stacks come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAllocator {
    /// Anonymous mapping per stack, optional guard page at the low end
    Mmap,
    /// `std::alloc` block, never guarded
    Heap,
}

impl StackAllocator {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mmap" => Some(StackAllocator::Mmap),
            "heap" | "malloc" => Some(StackAllocator::Heap),
            _ => None,
        }
    }
}

/// What to do when a stack cannot be allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocFailurePolicy {
    /// Log at error level and abort the process
    Abort,
    /// Return `ErrorKind::OutOfMemory` to the caller
    Error,
}

/// What the scheduler does when nothing can make progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockPolicy {
    /// Log once and keep re-ticking the reactor until progress appears
    Block,
    /// Stop the scheduler; parked waiters see `ErrorKind::Deadlock`
    ReturnError,
}

/// Per-thread engine configuration with builder pattern.
///
/// Use `from_env()` to start with compile-time defaults and apply
/// any environment variable overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Stack size used when a coroutine is created with size 0
    pub default_stack_size: usize,
    /// Stack backing store
    pub stack_allocator: StackAllocator,
    /// Leave a PROT_NONE page below each mmap stack
    pub guard_pages: bool,
    /// Stack allocation failure handling
    pub alloc_failure_policy: AllocFailurePolicy,
    /// Scheduler behavior on deadlock
    pub deadlock_policy: DeadlockPolicy,
    /// Re-tick interval while blocked on a deadlock
    pub deadlock_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EngineConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `COSTACK_STACK_SIZE` - Default stack size in bytes
    /// - `COSTACK_STACK_ALLOCATOR` - `mmap` or `heap`
    /// - `COSTACK_GUARD_PAGES` - Guard page below mmap stacks (0/1)
    /// - `COSTACK_ABORT_ON_ALLOC_FAILURE` - Abort instead of returning ENOMEM (0/1)
    /// - `COSTACK_BLOCK_ON_DEADLOCK` - Block instead of returning EDEADLK (0/1)
    /// - `COSTACK_DEADLOCK_POLL_MS` - Re-tick interval while deadlocked
    pub fn from_env() -> Self {
        let base = Self::new();
        let stack_allocator = env_get_opt::<String>("COSTACK_STACK_ALLOCATOR")
            .and_then(|s| StackAllocator::parse(&s))
            .unwrap_or(base.stack_allocator);
        let abort = env_get_bool(
            "COSTACK_ABORT_ON_ALLOC_FAILURE",
            base.alloc_failure_policy == AllocFailurePolicy::Abort,
        );
        let block = env_get_bool(
            "COSTACK_BLOCK_ON_DEADLOCK",
            base.deadlock_policy == DeadlockPolicy::Block,
        );

        Self {
            default_stack_size: env_get("COSTACK_STACK_SIZE", base.default_stack_size),
            stack_allocator,
            guard_pages: env_get_bool("COSTACK_GUARD_PAGES", base.guard_pages),
            alloc_failure_policy: if abort {
                AllocFailurePolicy::Abort
            } else {
                AllocFailurePolicy::Error
            },
            deadlock_policy: if block {
                DeadlockPolicy::Block
            } else {
                DeadlockPolicy::ReturnError
            },
            deadlock_poll_interval: env_get_duration_ms(
                "COSTACK_DEADLOCK_POLL_MS",
                base.deadlock_poll_interval,
            ),
        }
    }

    /// Create config with compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            default_stack_size: defaults::STACK_SIZE,
            stack_allocator: if defaults::HEAP_STACKS {
                StackAllocator::Heap
            } else {
                StackAllocator::Mmap
            },
            guard_pages: defaults::GUARD_PAGES,
            alloc_failure_policy: if defaults::ABORT_ON_ALLOC_FAILURE {
                AllocFailurePolicy::Abort
            } else {
                AllocFailurePolicy::Error
            },
            deadlock_policy: if defaults::BLOCK_ON_DEADLOCK {
                DeadlockPolicy::Block
            } else {
                DeadlockPolicy::ReturnError
            },
            deadlock_poll_interval: Duration::from_millis(defaults::DEADLOCK_POLL_MS),
        }
    }

    // Builder methods

    pub fn default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = size;
        self
    }

    pub fn stack_allocator(mut self, allocator: StackAllocator) -> Self {
        self.stack_allocator = allocator;
        self
    }

    pub fn guard_pages(mut self, enable: bool) -> Self {
        self.guard_pages = enable;
        self
    }

    pub fn alloc_failure_policy(mut self, policy: AllocFailurePolicy) -> Self {
        self.alloc_failure_policy = policy;
        self
    }

    pub fn deadlock_policy(mut self, policy: DeadlockPolicy) -> Self {
        self.deadlock_policy = policy;
        self
    }

    pub fn deadlock_poll_interval(mut self, d: Duration) -> Self {
        self.deadlock_poll_interval = d;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        if self.default_stack_size < MIN_STACK_SIZE || self.default_stack_size > MAX_STACK_SIZE {
            return Err(EngineError::new(
                ErrorKind::InvalidValue,
                format!(
                    "default_stack_size {} outside [{}, {}]",
                    self.default_stack_size, MIN_STACK_SIZE, MAX_STACK_SIZE
                ),
            ));
        }
        if self.deadlock_poll_interval.is_zero() {
            return Err(EngineError::new(
                ErrorKind::InvalidValue,
                "deadlock_poll_interval must be > 0",
            ));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("costack engine configuration:");
        eprintln!("  default_stack_size:     {}", self.default_stack_size);
        eprintln!("  stack_allocator:        {:?}", self.stack_allocator);
        eprintln!("  guard_pages:            {}", self.guard_pages);
        eprintln!("  alloc_failure_policy:   {:?}", self.alloc_failure_policy);
        eprintln!("  deadlock_policy:        {:?}", self.deadlock_policy);
        eprintln!("  deadlock_poll_interval: {:?}", self.deadlock_poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.alloc_failure_policy, AllocFailurePolicy::Abort);
        assert_eq!(config.deadlock_policy, DeadlockPolicy::Block);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .default_stack_size(64 * 1024)
            .stack_allocator(StackAllocator::Heap)
            .deadlock_policy(DeadlockPolicy::ReturnError);

        assert_eq!(config.default_stack_size, 64 * 1024);
        assert_eq!(config.stack_allocator, StackAllocator::Heap);
        assert_eq!(config.deadlock_policy, DeadlockPolicy::ReturnError);
    }

    #[test]
    fn test_validation() {
        let err = EngineConfig::new().default_stack_size(1024).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);

        let err = EngineConfig::new()
            .deadlock_poll_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_allocator_parse() {
        assert_eq!(StackAllocator::parse("MMAP"), Some(StackAllocator::Mmap));
        assert_eq!(StackAllocator::parse(" heap "), Some(StackAllocator::Heap));
        assert_eq!(StackAllocator::parse("slab"), None);
    }
}
