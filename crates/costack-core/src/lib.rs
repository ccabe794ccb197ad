//! # costack-core
//!
//! Core types and traits for the costack coroutine engine.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Stacks, context switching and the engine itself live in `costack-runtime`.
//!
//! ## Modules
//!
//! - `id` - Coroutine identifier type
//! - `state` - Coroutine state enum and flag set
//! - `error` - Error kinds, `EngineError`, errno mapping
//! - `traits` - Reactor (event loop) collaborator interface
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod traits;
pub mod kprint;
pub mod env;

use std::any::Any;

// Re-exports for convenience
pub use id::CoroutineId;
pub use state::{CoroutineFlags, CoroutineState};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use traits::{Interest, IoHandle, Reactor, TimerHandle};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Opaque data moved between coroutines by resume/yield.
///
/// Coroutines of one engine never leave their OS thread, so the payload
/// does not need to be `Send`.
pub type Payload = Box<dyn Any>;

/// Stack sizing constants
pub mod constants {
    /// Smallest stack a coroutine may run on (before page rounding)
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    cfg_if::cfg_if! {
        if #[cfg(feature = "large-stack")] {
            /// Recommended stack size when the caller passes 0
            pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;
        } else {
            /// Recommended stack size when the caller passes 0
            pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
        }
    }

    cfg_if::cfg_if! {
        if #[cfg(target_pointer_width = "64")] {
            /// Largest stack a coroutine may request
            pub const MAX_STACK_SIZE: usize = 16 * 1024 * 1024;
        } else {
            /// Largest stack a coroutine may request
            pub const MAX_STACK_SIZE: usize = 2 * 1024 * 1024;
        }
    }

    /// Fallback page size when the OS cannot be asked
    pub const FALLBACK_PAGE_SIZE: usize = 4096;

    /// Required stack pointer alignment on every supported ABI
    pub const STACK_ALIGN: usize = 16;
}
