//! Thread-local engine storage
//!
//! Every OS thread owns one lazily created [`Engine`]. Access goes
//! through short closures; no borrow may outlive the closure, and none
//! may be held across a context switch.

use crate::config::EngineConfig;
use crate::engine::Engine;
use costack_core::{kdebug, EngineError, EngineResult, ErrorKind};
use std::cell::RefCell;

thread_local! {
    static ENGINE: RefCell<Option<Engine>> = const { RefCell::new(None) };
}

/// Run `f` on this thread's engine, creating it from the environment
/// configuration on first use
#[inline]
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    ENGINE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let engine = slot.get_or_insert_with(|| {
            kdebug!("creating coroutine engine for {:?}", std::thread::current().id());
            Engine::new(EngineConfig::from_env())
        });
        f(engine)
    })
}

/// Like [`with_engine`] but never creates the engine and tolerates TLS
/// teardown; used from `Drop` impls
pub(crate) fn try_with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Option<R> {
    ENGINE
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            slot.as_mut().map(f)
        })
        .ok()
        .flatten()
}

/// Install an engine built from `config` on this thread
pub(crate) fn install(config: EngineConfig) -> EngineResult<()> {
    config.validate()?;
    ENGINE.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_some() {
            return Err(EngineError::new(
                ErrorKind::Misuse,
                "engine already initialized on this thread",
            ));
        }
        *slot = Some(Engine::new(config));
        Ok(())
    })
}

/// Check if this thread has an engine yet
pub(crate) fn is_initialized() -> bool {
    ENGINE.with(|cell| cell.borrow().is_some())
}

/// Store the error of a failed operation as the thread's last error
#[inline]
pub(crate) fn record<T>(result: EngineResult<T>) -> EngineResult<T> {
    if let Err(e) = &result {
        with_engine(|engine| engine.set_last_error(e.clone()));
    }
    result
}
