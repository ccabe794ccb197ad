//! Resume/yield protocol and coroutine state machine
//!
//! Each test runs on its own thread and therefore on a fresh engine.

use costack_core::{CoroutineState, ErrorKind};
use costack_runtime::engine;
use costack_runtime::{yield_now, yield_with, Coroutine, EngineConfig, StackAllocator};
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<&'static str>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn scenario_yield_value_to_main() {
    let a = Coroutine::create(|_| {
        yield_with(Some(Box::new(42i32))).unwrap();
        None
    })
    .unwrap();

    let got = a.resume(None).unwrap().expect("payload");
    assert_eq!(*got.downcast::<i32>().unwrap(), 42);
    a.resume(None).unwrap();
}

#[test]
fn scenario_yield_follows_resume_chain() {
    let events = log();

    let ev = events.clone();
    let c = Coroutine::create(move |_| {
        ev.borrow_mut().push("c runs");
        yield_now().unwrap();
        ev.borrow_mut().push("c resumed");
        None
    })
    .unwrap();

    let ev = events.clone();
    let b = Coroutine::create(move |_| {
        ev.borrow_mut().push("b resumes c");
        c.resume(None).unwrap();
        // c's yield lands here, not in main
        ev.borrow_mut().push("b after c yielded");
        c.resume(None).unwrap();
        ev.borrow_mut().push("b done");
        None
    })
    .unwrap();

    b.resume(None).unwrap();
    events.borrow_mut().push("main");

    assert_eq!(
        *events.borrow(),
        vec!["b resumes c", "c runs", "b after c yielded", "c resumed", "b done", "main"]
    );
}

#[test]
fn state_machine_transitions() {
    let seen: Rc<RefCell<Vec<CoroutineState>>> = Rc::new(RefCell::new(Vec::new()));

    let s = seen.clone();
    let co = Coroutine::builder()
        .manual_close(true)
        .spawn(move |_| {
            let me = Coroutine::current();
            s.borrow_mut().push(me.state().unwrap());
            // single holder: main is suspended while we run
            s.borrow_mut().push(Coroutine::main().state().unwrap());
            yield_now().unwrap();
            None
        })
        .unwrap();

    assert_eq!(co.state().unwrap(), CoroutineState::Waiting);
    co.resume(None).unwrap();
    assert_eq!(co.state().unwrap(), CoroutineState::Waiting);
    assert_eq!(Coroutine::main().state().unwrap(), CoroutineState::Running);
    co.resume(None).unwrap();
    assert_eq!(co.state().unwrap(), CoroutineState::Dead);

    assert_eq!(
        *seen.borrow(),
        vec![CoroutineState::Running, CoroutineState::Waiting]
    );
    co.close().unwrap();
}

#[test]
fn resume_running_is_busy_and_leaves_state() {
    let checked = Rc::new(RefCell::new(None));

    let c = checked.clone();
    let co = Coroutine::create(move |_| {
        let me = Coroutine::current();
        let err = me.resume(None).unwrap_err();
        *c.borrow_mut() = Some((err.kind(), me.state().unwrap()));
        None
    })
    .unwrap();
    co.resume(None).unwrap();

    assert_eq!(
        *checked.borrow(),
        Some((ErrorKind::Busy, CoroutineState::Running))
    );
}

#[test]
fn resume_dead_is_not_found() {
    let co = Coroutine::builder().manual_close(true).spawn(|_| None).unwrap();
    co.resume(None).unwrap();
    assert_eq!(co.resume(None).unwrap_err().kind(), ErrorKind::NotFound);
    co.close().unwrap();
    assert_eq!(co.resume(None).unwrap_err().kind(), ErrorKind::StaleHandle);
}

#[test]
fn yield_without_target_does_not_switch() {
    let round = engine::stats().round;
    assert_eq!(yield_now().unwrap_err().kind(), ErrorKind::Misuse);
    assert_eq!(engine::stats().round, round);
    assert_eq!(Coroutine::current(), Coroutine::main());
}

#[test]
fn round_strictly_increases() {
    let co = Coroutine::create(|_| {
        for _ in 0..5 {
            yield_now().unwrap();
        }
        None
    })
    .unwrap();

    let mut last = engine::stats().round;
    let mut last_co = 0;
    for _ in 0..5 {
        co.resume(None).unwrap();
        let round = engine::stats().round;
        assert!(round > last);
        last = round;

        let co_round = co.round().unwrap();
        assert!(co_round > last_co);
        last_co = co_round;
    }
    co.resume(None).unwrap();
}

#[test]
fn return_value_goes_to_resumer() {
    let co = Coroutine::create(|_| Some(Box::new(String::from("bye")))).unwrap();
    let out = co.resume(None).unwrap().unwrap();
    assert_eq!(*out.downcast::<String>().unwrap(), "bye");
}

#[test]
fn deferred_free_releases_slot_and_count() {
    let before = engine::stats();
    for _ in 0..10 {
        let co = Coroutine::create(|_| None).unwrap();
        co.resume(None).unwrap();
    }
    let after = engine::stats();
    assert_eq!(after.active, before.active);
    // finished coroutines hand their slot to the next one
    assert!(after.slots <= before.slots + 1);
}

#[test]
fn linkage_accessors() {
    let co = Coroutine::create(|_| {
        let me = Coroutine::current();
        assert_eq!(me.previous().unwrap(), Some(Coroutine::main()));
        assert_eq!(me.switched_from().unwrap(), Some(Coroutine::main()));
        assert_eq!(Coroutine::main().next().unwrap(), Some(me));
        yield_now().unwrap();
        None
    })
    .unwrap();
    co.resume(None).unwrap();
    // yield unlinked the chain
    assert_eq!(co.previous().unwrap(), None);
    assert_eq!(Coroutine::main().next().unwrap(), None);
    co.resume(None).unwrap();
}

#[test]
fn init_configures_engine_once() {
    let config = EngineConfig::new()
        .stack_allocator(StackAllocator::Heap)
        .default_stack_size(64 * 1024);
    engine::init(config).unwrap();
    assert!(engine::is_initialized());

    let co = Coroutine::create(|_| None).unwrap();
    assert_eq!(co.stack_size().unwrap(), 64 * 1024);
    co.resume(None).unwrap();

    let again = engine::init(EngineConfig::new()).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Misuse);
}

#[test]
fn invalid_config_is_rejected() {
    let err = engine::init(EngineConfig::new().default_stack_size(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert!(!engine::is_initialized());
}

#[test]
fn panic_in_body_does_not_unwind_into_resumer() {
    let co = Coroutine::create(|_| -> Option<costack_core::Payload> {
        panic!("body failure");
    })
    .unwrap();
    assert!(co.resume(None).unwrap().is_none());
    let err = engine::last_error().unwrap();
    assert_eq!(err.kind(), ErrorKind::Panicked);
}
