//! Per-thread coroutine engine
//!
//! Owns the coroutine arena, the resume chain, the round counter and the
//! scheduler registration of one OS thread. This is the only module that
//! changes a coroutine's state, round or chain links.
//!
//! # Switch protocol
//!
//! Every switch is split in two halves around the register swap:
//!
//! ```text
//! begin_*        validate, relink, stamp round, stage payload   (borrowed)
//! arch::switch   registers only                                (no borrow)
//! complete_switch  mark Running, take payload, free dead `from` (borrowed)
//! ```
//!
//! A coroutine that finishes cannot free its own stack while running on
//! it, so whoever receives control from a dead coroutine frees it in
//! `complete_switch` (deferred free).

use crate::arch::{self, Context, Regs};
use crate::config::EngineConfig;
use crate::coroutine::Coroutine;
use crate::memory::Stack;
use crate::tls::{self, with_engine};
use crate::wait::{WaitTicket, Wakeup};
use costack_core::{
    kdebug, kerror, kprint, ktrace, kwarn, CoroutineFlags, CoroutineId, CoroutineState,
    EngineError, EngineResult, ErrorKind, Payload,
};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coroutine body: receives the first resume's payload, returns the
/// payload handed to whoever gets control when it dies
pub(crate) type Body = Box<dyn FnOnce(Option<Payload>) -> Option<Payload>>;

/// Values released while the engine is borrowed, dropped after the
/// borrow ends (their destructors may call back into the engine)
#[derive(Default)]
pub(crate) struct Garbage {
    stacks: Vec<Stack>,
    bodies: Vec<Body>,
    payloads: Vec<Payload>,
    wakeups: Vec<Wakeup>,
}

/// Register files of one switch
pub(crate) struct SwitchPair {
    from: *mut Regs,
    to: *const Regs,
}

/// Arena entry of one coroutine
pub(crate) struct Entry {
    pub(crate) id: CoroutineId,
    pub(crate) state: CoroutineState,
    pub(crate) flags: CoroutineFlags,
    pub(crate) round: u64,
    pub(crate) from: Option<Coroutine>,
    pub(crate) previous: Option<Coroutine>,
    pub(crate) next: Option<Coroutine>,
    context: Context,
    stack: Option<Stack>,
    pub(crate) stack_size: usize,
    body: Option<Body>,
    transfer: Option<Payload>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    /// Sequence number of the last armed wait
    pub(crate) wait_seq: u64,
    /// Wait currently armed, if any
    pub(crate) waiting_on: Option<u64>,
    /// Parked inside the wait primitive
    pub(crate) wait_parked: bool,
    /// Wakeup delivered before the coroutine parked
    pub(crate) early_wake: Option<Wakeup>,
    pub(crate) error: Option<EngineError>,
}

impl Entry {
    fn new(id: CoroutineId, flags: CoroutineFlags, context: Context) -> Self {
        Self {
            id,
            state: CoroutineState::Init,
            flags,
            round: 0,
            from: None,
            previous: None,
            next: None,
            context,
            stack: None,
            stack_size: 0,
            body: None,
            transfer: None,
            start_time: None,
            end_time: None,
            wait_seq: 0,
            waiting_on: None,
            wait_parked: false,
            early_wake: None,
            error: None,
        }
    }

    /// Started and not yet finished
    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_none()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        match self.start_time {
            Some(start) => self.end_time.unwrap_or_else(Instant::now) - start,
            None => Duration::ZERO,
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Cross-thread view of an engine, read by the watchdog
///
/// Updated with relaxed stores on every switch. Readers get an
/// approximate picture; no ordering between the fields is promised.
#[derive(Debug)]
pub struct EngineSnapshot {
    round: AtomicU64,
    current: AtomicU64,
    scheduler: AtomicU64,
    count: AtomicUsize,
}

impl EngineSnapshot {
    fn new() -> Self {
        Self {
            round: AtomicU64::new(0),
            current: AtomicU64::new(CoroutineId::MAIN.as_u64()),
            scheduler: AtomicU64::new(CoroutineId::NONE.as_u64()),
            count: AtomicUsize::new(1),
        }
    }

    #[inline]
    pub fn round(&self) -> u64 {
        self.round.load(Ordering::Relaxed)
    }

    /// Id of the coroutine running on the observed thread
    #[inline]
    pub fn current(&self) -> CoroutineId {
        CoroutineId::new(self.current.load(Ordering::Relaxed))
    }

    /// Id of the registered scheduler, `CoroutineId::NONE` if none
    #[inline]
    pub fn scheduler(&self) -> CoroutineId {
        CoroutineId::new(self.scheduler.load(Ordering::Relaxed))
    }

    /// Live coroutines, main included, scheduler excluded
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

/// Engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Live coroutines, main included, scheduler excluded
    pub active: usize,
    /// Highest `active` seen
    pub peak_active: usize,
    /// Switches performed so far
    pub round: u64,
    /// Coroutines parked in the wait-all queue
    pub waiters: usize,
    /// Arena slots allocated (live or free)
    pub slots: usize,
    pub scheduler_running: bool,
}

pub(crate) struct Engine {
    config: EngineConfig,
    slots: Vec<Slot>,
    free: Vec<u32>,
    main: Coroutine,
    current: Coroutine,
    scheduler: Option<Coroutine>,
    next_id: CoroutineId,
    round: u64,
    count: usize,
    peak_count: usize,
    switches_denied: u32,
    pub(crate) waiters: VecDeque<WaitTicket>,
    pub(crate) scheduler_stop: bool,
    last_error: Option<EngineError>,
    snapshot: Arc<EngineSnapshot>,
}

impl Engine {
    pub(crate) fn new(config: EngineConfig) -> Self {
        let mut main = Entry::new(CoroutineId::MAIN, CoroutineFlags::NONE, Context::empty());
        main.state = CoroutineState::Running;
        main.start_time = Some(Instant::now());

        let handle = Coroutine::from_parts(0, 0);
        kprint::set_coroutine_id(CoroutineId::MAIN.as_u64());

        Self {
            config,
            slots: vec![Slot {
                generation: 0,
                entry: Some(main),
            }],
            free: Vec::new(),
            main: handle,
            current: handle,
            scheduler: None,
            next_id: CoroutineId::FIRST_USER,
            round: 0,
            count: 1,
            peak_count: 1,
            switches_denied: 0,
            waiters: VecDeque::new(),
            scheduler_stop: false,
            last_error: None,
            snapshot: Arc::new(EngineSnapshot::new()),
        }
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    fn stale(co: Coroutine) -> EngineError {
        EngineError::new(
            ErrorKind::StaleHandle,
            format!("{:?} refers to a freed coroutine", co),
        )
    }

    pub(crate) fn entry(&self, co: Coroutine) -> EngineResult<&Entry> {
        self.slots
            .get(co.slot() as usize)
            .filter(|s| s.generation == co.generation())
            .and_then(|s| s.entry.as_ref())
            .ok_or_else(|| Self::stale(co))
    }

    pub(crate) fn entry_mut(&mut self, co: Coroutine) -> EngineResult<&mut Entry> {
        self.slots
            .get_mut(co.slot() as usize)
            .filter(|s| s.generation == co.generation())
            .and_then(|s| s.entry.as_mut())
            .ok_or_else(|| Self::stale(co))
    }

    /// Coroutines parked in the wait primitive with an armed wait, as
    /// `(handle, wait sequence)`, oldest slot first
    pub(crate) fn parked_waits(&self) -> Vec<(Coroutine, u64)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.entry.as_ref()?;
                let seq = entry.waiting_on.filter(|_| entry.wait_parked)?;
                entry
                    .state
                    .is_resumable()
                    .then(|| (Coroutine::from_parts(index as u32, slot.generation), seq))
            })
            .collect()
    }

    fn insert(&mut self, entry: Entry) -> Coroutine {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                Coroutine::from_parts(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                Coroutine::from_parts(index, 0)
            }
        }
    }

    fn free_slot(&mut self, co: Coroutine, garbage: &mut Garbage) {
        let Some(slot) = self.slots.get_mut(co.slot() as usize) else {
            return;
        };
        if slot.generation != co.generation() {
            return;
        }
        if let Some(entry) = slot.entry.take() {
            ktrace!("freeing coroutine {} ({:?})", entry.id, co);
            garbage.collect(entry);
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(co.slot());
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn current(&self) -> Coroutine {
        self.current
    }

    #[inline]
    pub(crate) fn main(&self) -> Coroutine {
        self.main
    }

    #[inline]
    pub(crate) fn scheduler(&self) -> Option<Coroutine> {
        self.scheduler
    }

    #[inline]
    pub(crate) fn active_count(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub(crate) fn stats(&self) -> EngineStats {
        EngineStats {
            active: self.count,
            peak_active: self.peak_count,
            round: self.round,
            waiters: self.waiters.len(),
            slots: self.slots.len(),
            scheduler_running: self.scheduler.is_some(),
        }
    }

    pub(crate) fn set_last_error(&mut self, error: EngineError) {
        self.last_error = Some(error);
    }

    pub(crate) fn last_error(&self) -> Option<EngineError> {
        self.last_error.clone()
    }

    pub(crate) fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    fn publish(&self) {
        let current = self
            .entry(self.current)
            .map(|e| e.id)
            .unwrap_or(CoroutineId::NONE);
        let scheduler = self
            .scheduler
            .and_then(|s| self.entry(s).ok())
            .map(|e| e.id)
            .unwrap_or(CoroutineId::NONE);
        self.snapshot.round.store(self.round, Ordering::Relaxed);
        self.snapshot.current.store(current.as_u64(), Ordering::Relaxed);
        self.snapshot.scheduler.store(scheduler.as_u64(), Ordering::Relaxed);
        self.snapshot.count.store(self.count, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Allocate a stack and build a fresh context; the result is
    /// `Waiting` and counted as active
    pub(crate) fn create(
        &mut self,
        body: Body,
        stack_size: usize,
        flags: CoroutineFlags,
        id: Option<CoroutineId>,
    ) -> EngineResult<Coroutine> {
        let stack = Stack::allocate(
            stack_size,
            self.config.default_stack_size,
            self.config.stack_allocator,
            self.config.guard_pages,
            self.config.alloc_failure_policy,
        )?;

        let id = id.unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id = id.next();
            id
        });

        let mut entry = Entry::new(id, flags | CoroutineFlags::ALLOCATED, Context::empty());
        entry.stack_size = stack.size();
        entry.body = Some(body);
        let co = self.insert(entry);

        // The slot index rides along as the entry argument for a sanity check
        let context = unsafe { Context::prepare(stack.top(), coroutine_entry, co.slot() as usize) };
        let entry = self.entry_mut(co)?;
        entry.context = context;
        entry.stack = Some(stack);
        entry.state = CoroutineState::Waiting;

        self.count += 1;
        self.peak_count = self.peak_count.max(self.count);
        self.publish();
        kdebug!("created coroutine {} ({:?})", id, co);
        Ok(co)
    }

    pub(crate) fn take_body(&mut self) -> Option<Body> {
        let current = self.current;
        self.entry_mut(current).ok().and_then(|e| e.body.take())
    }

    /// Free a coroutine that is not alive
    pub(crate) fn close(&mut self, co: Coroutine, garbage: &mut Garbage) -> EngineResult<()> {
        if co == self.main || Some(co) == self.scheduler {
            return Err(EngineError::misuse(
                "the main and scheduler coroutines cannot be closed",
            ));
        }
        let entry = self.entry(co)?;
        if entry.flags.contains(CoroutineFlags::SCHEDULER) {
            return Err(EngineError::misuse("the scheduler coroutine cannot be closed"));
        }
        if entry.state.is_busy() {
            return Err(EngineError::busy(format!("coroutine {} is running", entry.id)));
        }
        if entry.is_alive() {
            return Err(EngineError::busy(format!(
                "coroutine {} is suspended mid-body",
                entry.id
            )));
        }
        if !entry.state.is_dead() {
            self.count = self.count.saturating_sub(1);
        }
        self.waiters.retain(|w| w.coroutine() != co);
        self.unlink(co);
        self.free_slot(co, garbage);
        self.publish();
        Ok(())
    }

    /// Deferred free of a coroutine that switched away for the last time
    fn release_dead(&mut self, co: Coroutine, garbage: &mut Garbage) {
        let manual = match self.entry_mut(co) {
            Ok(entry) => {
                if let Some(stack) = entry.stack.take() {
                    garbage.stacks.push(stack);
                }
                entry.flags.contains(CoroutineFlags::MANUAL_CLOSE)
            }
            Err(_) => return,
        };
        if !manual {
            self.free_slot(co, garbage);
        }
    }

    pub(crate) fn record_panic(&mut self, message: String) {
        let error = EngineError::new(ErrorKind::Panicked, message);
        let current = self.current;
        if let Ok(entry) = self.entry_mut(current) {
            entry.error = Some(error.clone());
        }
        self.last_error = Some(error);
    }

    // ------------------------------------------------------------------
    // Chain
    // ------------------------------------------------------------------

    /// Remove `co` from its chain, joining its neighbours
    fn unlink(&mut self, co: Coroutine) {
        let (previous, next) = match self.entry_mut(co) {
            Ok(entry) => (entry.previous.take(), entry.next.take()),
            Err(_) => return,
        };
        if let Some(p) = previous {
            if let Ok(entry) = self.entry_mut(p) {
                if entry.next == Some(co) {
                    entry.next = next;
                }
            }
        }
        if let Some(n) = next {
            if let Ok(entry) = self.entry_mut(n) {
                if entry.previous == Some(co) {
                    entry.previous = previous;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Switching
    // ------------------------------------------------------------------

    pub(crate) fn deny_switch(&mut self) {
        self.switches_denied += 1;
    }

    pub(crate) fn allow_switch(&mut self) {
        self.switches_denied = self.switches_denied.saturating_sub(1);
    }

    fn check_switch_allowed(&self) -> EngineResult<()> {
        if self.switches_denied > 0 {
            return Err(EngineError::misuse("coroutine switching is denied here"));
        }
        Ok(())
    }

    /// First half of `resume(target, data)`
    ///
    /// `data` is only taken once every check has passed.
    pub(crate) fn begin_resume(
        &mut self,
        target: Coroutine,
        data: &mut Option<Payload>,
        garbage: &mut Garbage,
    ) -> EngineResult<SwitchPair> {
        self.check_switch_allowed()?;
        let entry = self.entry(target)?;
        if target == self.current {
            return Err(EngineError::busy(format!("coroutine {} is already running", entry.id)));
        }
        match entry.state {
            CoroutineState::Waiting => {}
            CoroutineState::Running | CoroutineState::Locked => {
                return Err(EngineError::busy(format!("coroutine {} is already running", entry.id)));
            }
            CoroutineState::Dead => {
                return Err(EngineError::new(
                    ErrorKind::NotFound,
                    format!("coroutine {} is dead", entry.id),
                ));
            }
            CoroutineState::Init => {
                return Err(EngineError::misuse(format!(
                    "coroutine {} is uninitialized",
                    entry.id
                )));
            }
        }

        let current = self.current;
        self.unlink(target);
        self.entry_mut(target)?.previous = Some(current);
        self.entry_mut(current)?.next = Some(target);
        self.begin_switch(target, data, garbage)
    }

    /// First half of `yield(data)`
    pub(crate) fn begin_yield(
        &mut self,
        data: &mut Option<Payload>,
        garbage: &mut Garbage,
    ) -> EngineResult<SwitchPair> {
        self.check_switch_allowed()?;
        let current = self.current;
        let target = match self.entry(current)?.previous {
            Some(previous) => previous,
            None => match self.scheduler {
                Some(scheduler) if scheduler != current => scheduler,
                _ => {
                    return Err(EngineError::misuse(
                        "nowhere to yield: no previous coroutine and no scheduler",
                    ))
                }
            },
        };
        let entry = self.entry(target)?;
        if !entry.state.is_resumable() {
            return Err(EngineError::misuse(format!(
                "yield target {} is {}",
                entry.id, entry.state
            )));
        }

        self.unlink(current);
        self.begin_switch(target, data, garbage)
    }

    /// First half of the final switch of a coroutine whose body returned
    pub(crate) fn begin_finish(
        &mut self,
        retval: Option<Payload>,
        garbage: &mut Garbage,
    ) -> EngineResult<SwitchPair> {
        let me = self.current;
        let entry = self.entry_mut(me)?;
        entry.state = CoroutineState::Dead;
        entry.end_time = Some(Instant::now());
        entry.flags.remove(CoroutineFlags::ACCEPT_DATA);
        let is_scheduler = entry.flags.contains(CoroutineFlags::SCHEDULER);
        let previous = entry.previous;
        let id = entry.id;

        // A registered scheduler already took itself out of the count
        if !is_scheduler {
            self.count = self.count.saturating_sub(1);
        }
        self.unlink(me);

        let target = {
            let engine: &Engine = self;
            let resumable = |co: Coroutine| {
                engine.entry(co).map(|e| e.state.is_resumable()).unwrap_or(false)
            };
            previous
                .filter(|p| resumable(*p))
                .or_else(|| engine.scheduler.filter(|s| *s != me && resumable(*s)))
                .unwrap_or(engine.main)
        };

        kdebug!("coroutine {} finished", id);
        let mut data = retval;
        self.begin_switch(target, &mut data, garbage)
    }

    /// Bookkeeping shared by every switch: states, round, payload, `from`
    fn begin_switch(
        &mut self,
        target: Coroutine,
        data: &mut Option<Payload>,
        garbage: &mut Garbage,
    ) -> EngineResult<SwitchPair> {
        let current = self.current;
        self.round += 1;
        let round = self.round;

        let from = {
            let entry = self.entry_mut(current)?;
            if !entry.state.is_dead() {
                entry.state = CoroutineState::Waiting;
                entry.flags.insert(CoroutineFlags::ACCEPT_DATA);
            }
            entry.context.regs_mut()
        };

        let (to, target_id) = {
            let entry = self.entry_mut(target)?;
            let started = entry.start_time.is_some();
            if let Some(payload) = data.take() {
                let accepts = !started || entry.flags.contains(CoroutineFlags::ACCEPT_DATA);
                debug_assert!(accepts, "payload sent to coroutine {} not accepting data", entry.id);
                if accepts {
                    entry.transfer = Some(payload);
                } else {
                    kwarn!("dropping payload sent to coroutine {} not accepting data", entry.id);
                    garbage.payloads.push(payload);
                }
            }
            if !started {
                entry.start_time = Some(Instant::now());
            }
            entry.state = CoroutineState::Locked;
            entry.from = Some(current);
            entry.round = round;
            (entry.context.regs(), entry.id)
        };

        self.current = target;
        self.publish();
        kprint::set_coroutine_id(target_id.as_u64());
        Ok(SwitchPair { from, to })
    }

    /// Second half of every switch, run by the coroutine that received
    /// control
    pub(crate) fn complete_switch(&mut self, garbage: &mut Garbage) -> Option<Payload> {
        let me = self.current;
        let (data, from) = match self.entry_mut(me) {
            Ok(entry) => {
                entry.state = CoroutineState::Running;
                entry.flags.remove(CoroutineFlags::ACCEPT_DATA);
                (entry.transfer.take(), entry.from)
            }
            Err(_) => return None,
        };
        if let Some(from) = from {
            let dead = self.entry(from).map(|e| e.state.is_dead()).unwrap_or(false);
            if dead {
                self.release_dead(from, garbage);
            }
        }
        data
    }

    // ------------------------------------------------------------------
    // Scheduler registration
    // ------------------------------------------------------------------

    pub(crate) fn register_scheduler(&mut self) -> EngineResult<()> {
        if let Some(existing) = self.scheduler {
            let id = self.entry(existing).map(|e| e.id).unwrap_or(CoroutineId::NONE);
            return Err(EngineError::misuse(format!(
                "a scheduler ({}) is already registered on this thread",
                id
            )));
        }
        let me = self.current;
        self.entry_mut(me)?.flags.insert(CoroutineFlags::SCHEDULER);
        self.scheduler = Some(me);
        self.count = self.count.saturating_sub(1);
        self.scheduler_stop = false;
        self.publish();
        Ok(())
    }

    pub(crate) fn unregister_scheduler(&mut self) {
        if self.scheduler == Some(self.current) {
            self.scheduler = None;
            self.publish();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let live = self.count.saturating_sub(1);
        if live > 0 {
            kwarn!("engine torn down with {} unfinished coroutine(s)", live);
        }
        kprint::clear_coroutine_id();
    }
}

impl Garbage {
    fn collect(&mut self, mut entry: Entry) {
        if let Some(stack) = entry.stack.take() {
            self.stacks.push(stack);
        }
        if let Some(body) = entry.body.take() {
            self.bodies.push(body);
        }
        if let Some(payload) = entry.transfer.take() {
            self.payloads.push(payload);
        }
        if let Some(wakeup) = entry.early_wake.take() {
            self.wakeups.push(wakeup);
        }
    }
}

// ----------------------------------------------------------------------
// Switch drivers (no borrow held across `arch::switch`)
// ----------------------------------------------------------------------

/// Run the first half under the engine borrow, switch, run the second
/// half in whichever coroutine receives control back here
pub(crate) fn switch_with<F>(prepare: F) -> EngineResult<Option<Payload>>
where
    F: FnOnce(&mut Engine, &mut Garbage) -> EngineResult<SwitchPair>,
{
    let mut garbage = Garbage::default();
    let pair = with_engine(|engine| prepare(engine, &mut garbage));
    drop(garbage);
    let pair = pair?;

    unsafe { arch::switch(pair.from, pair.to) };

    let mut garbage = Garbage::default();
    Ok(with_engine(|engine| engine.complete_switch(&mut garbage)))
}

/// Entry of every coroutine stack (reached through the arch trampoline)
extern "C" fn coroutine_entry(slot: usize) -> ! {
    let mut garbage = Garbage::default();
    let (data, body) = with_engine(|engine| {
        debug_assert_eq!(engine.current().slot() as usize, slot);
        let data = engine.complete_switch(&mut garbage);
        (data, engine.take_body())
    });
    drop(garbage);

    let retval = match body {
        Some(body) => run_body(body, data),
        None => None,
    };
    finish(retval)
}

/// Run the body, turning a panic into a recorded error
fn run_body(body: Body, data: Option<Payload>) -> Option<Payload> {
    match panic::catch_unwind(AssertUnwindSafe(move || body(data))) {
        Ok(retval) => retval,
        Err(cause) => {
            let message = if let Some(s) = cause.downcast_ref::<&str>() {
                format!("coroutine panicked: {}", s)
            } else if let Some(s) = cause.downcast_ref::<String>() {
                format!("coroutine panicked: {}", s)
            } else {
                "coroutine panicked".to_string()
            };
            kerror!("{}", message);
            with_engine(|engine| engine.record_panic(message));
            None
        }
    }
}

fn finish(retval: Option<Payload>) -> ! {
    let mut garbage = Garbage::default();
    let pair = with_engine(|engine| engine.begin_finish(retval, &mut garbage));
    drop(garbage);

    match pair {
        Ok(pair) => unsafe { arch::switch(pair.from, pair.to) },
        Err(e) => kerror!("coroutine could not hand off control: {}", e),
    }
    kerror!("a finished coroutine was switched back into");
    std::process::abort()
}

// ----------------------------------------------------------------------
// Thread-level API
// ----------------------------------------------------------------------

/// Configure this thread's engine before its first use
///
/// Fails with `Misuse` if the engine already exists (any coroutine call
/// creates it from the environment defaults).
pub fn init(config: EngineConfig) -> EngineResult<()> {
    tls::install(config)
}

/// Check whether this thread's engine exists yet
pub fn is_initialized() -> bool {
    tls::is_initialized()
}

/// Watchdog view of this thread's engine
pub fn snapshot() -> Arc<EngineSnapshot> {
    with_engine(|engine| engine.snapshot())
}

pub fn stats() -> EngineStats {
    with_engine(|engine| engine.stats())
}

/// Last error recorded by a failing engine operation on this thread
pub fn last_error() -> Option<EngineError> {
    with_engine(|engine| engine.last_error())
}

pub fn clear_last_error() {
    with_engine(|engine| engine.clear_last_error());
}

/// Guard returned by [`deny_switch`]
#[must_use = "switching is allowed again as soon as the guard is dropped"]
pub struct SwitchGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Forbid every resume and yield on this thread while the guard lives
///
/// Guards nest. Used around code that must not suspend, e.g. destructors
/// that hold engine-external borrows.
pub fn deny_switch() -> SwitchGuard {
    with_engine(|engine| engine.deny_switch());
    SwitchGuard {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for SwitchGuard {
    fn drop(&mut self) {
        tls::try_with_engine(|engine| engine.allow_switch());
    }
}
