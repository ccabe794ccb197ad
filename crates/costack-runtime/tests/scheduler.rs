//! Scheduler coroutine, wait primitive and reactor working together

use costack_core::ErrorKind;
use costack_runtime::engine;
use costack_runtime::scheduler;
use costack_runtime::wait::{self, WaitTicket};
use costack_runtime::{
    scheduler_close, scheduler_run, Coroutine, DeadlockPolicy, EngineConfig, FdWaiter,
    PollReactor, SchedulerHooks, WaitGroup,
};
use costack_core::Interest;
use std::cell::{Cell, RefCell};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn start(policy: DeadlockPolicy) -> Rc<PollReactor> {
    let reactor = Rc::new(PollReactor::new().unwrap());
    scheduler_run(SchedulerHooks::from_reactor(reactor.clone()).policy(policy)).unwrap();
    reactor
}

#[test]
fn scenario_timed_wait_then_clean_close() {
    start(DeadlockPolicy::ReturnError);
    let outcome = Rc::new(Cell::new(None));

    let o = outcome.clone();
    let d = Coroutine::create(move |_| {
        let begin = Instant::now();
        let ok = wait::wait_ms(1000);
        let kind = engine::last_error().map(|e| e.kind());
        o.set(Some((ok, kind, begin.elapsed())));
        None
    })
    .unwrap();
    d.resume(None).unwrap();
    assert!(outcome.get().is_none());

    scheduler_close().unwrap();

    let (ok, kind, elapsed) = outcome.get().unwrap();
    assert!(!ok);
    assert_eq!(kind, Some(ErrorKind::TimedOut));
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(!scheduler::is_running());
    assert_eq!(engine::stats().active, 1);
}

#[test]
fn timers_wake_in_deadline_order() {
    start(DeadlockPolicy::ReturnError);
    let order = Rc::new(RefCell::new(Vec::new()));

    for (name, ms) in [("slow", 40u64), ("fast", 10), ("mid", 25)] {
        let o = order.clone();
        let co = Coroutine::create(move |_| {
            wait::sleep(Duration::from_millis(ms)).unwrap();
            o.borrow_mut().push(name);
            None
        })
        .unwrap();
        co.resume(None).unwrap();
    }

    scheduler_close().unwrap();
    assert_eq!(*order.borrow(), vec!["fast", "mid", "slow"]);
}

#[test]
fn deadlock_return_error_reaches_waiters() {
    start(DeadlockPolicy::ReturnError);
    let observed = Rc::new(RefCell::new(Vec::new()));

    let o = observed.clone();
    let armed = Coroutine::create(move |_| {
        // armed, but nobody holds the ticket
        wait::arm().unwrap();
        o.borrow_mut().push(wait::wait_for(None).err().map(|e| e.kind()));
        None
    })
    .unwrap();
    armed.resume(None).unwrap();

    let o = observed.clone();
    let forever = Coroutine::create(move |_| {
        o.borrow_mut().push(wait::wait_for(None).err().map(|e| e.kind()));
        None
    })
    .unwrap();
    forever.resume(None).unwrap();

    let err = scheduler_close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deadlock);
    assert_eq!(engine::last_error().unwrap().kind(), ErrorKind::Deadlock);
    assert!(!scheduler::is_running());

    // every parked coroutine was resumed once, with the deadlock
    assert_eq!(
        *observed.borrow(),
        vec![Some(ErrorKind::Deadlock), Some(ErrorKind::Deadlock)]
    );
    assert_eq!(engine::stats().active, 1);
}

#[test]
fn deadlock_hook_can_break_the_deadlock() {
    let parked: Rc<Cell<Option<WaitTicket>>> = Rc::new(Cell::new(None));
    let hook_calls = Rc::new(Cell::new(0));

    let reactor = Rc::new(PollReactor::new().unwrap());
    let (p, calls) = (parked.clone(), hook_calls.clone());
    let hooks = SchedulerHooks::from_reactor(reactor)
        .policy(DeadlockPolicy::Block)
        .on_deadlock(move || {
            calls.set(calls.get() + 1);
            if let Some(ticket) = p.take() {
                ticket.complete(Some(Box::new("unblocked")));
            }
        });
    scheduler_run(hooks).unwrap();

    let got = Rc::new(RefCell::new(None));
    let (p, g) = (parked.clone(), got.clone());
    let co = Coroutine::create(move |_| {
        p.set(Some(wait::arm().unwrap()));
        let data = wait::wait_for(None).unwrap().unwrap();
        *g.borrow_mut() = Some(*data.downcast::<&str>().unwrap());
        None
    })
    .unwrap();
    co.resume(None).unwrap();

    scheduler_close().unwrap();
    assert_eq!(*got.borrow(), Some("unblocked"));
    assert_eq!(hook_calls.get(), 1);
}

#[test]
fn blocked_scheduler_resumes_on_remote_progress() {
    engine::init(
        EngineConfig::new()
            .deadlock_policy(DeadlockPolicy::Block)
            .deadlock_poll_interval(Duration::from_millis(10)),
    )
    .unwrap();
    let reactor = Rc::new(PollReactor::new().unwrap());
    let remote = reactor.remote();
    scheduler_run(SchedulerHooks::from_reactor(reactor)).unwrap();

    let done = Rc::new(Cell::new(false));
    let d = done.clone();
    let (tx, rx) = std::sync::mpsc::channel::<WaitTicket>();
    let co = Coroutine::create(move |_| {
        tx.send(wait::arm().unwrap()).unwrap();
        wait::wait_for(None).unwrap();
        d.set(true);
        None
    })
    .unwrap();
    co.resume(None).unwrap();

    let ticket = rx.recv().unwrap();
    let helper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        remote.post(move || {
            ticket.complete(None);
        });
    });

    scheduler_close().unwrap();
    helper.join().unwrap();
    assert!(done.get());
}

#[test]
fn closing_resource_cancels_parked_wait() {
    let reactor = start(DeadlockPolicy::ReturnError);
    let (rx, _tx) = nix::unistd::pipe().unwrap();
    let waiter = Rc::new(FdWaiter::new(rx.as_raw_fd()));
    let result = Rc::new(Cell::new(None));

    let (w, r) = (waiter.clone(), result.clone());
    let reader = Coroutine::create(move |_| {
        r.set(Some(w.wait(Interest::READABLE, None).map_err(|e| e.kind())));
        None
    })
    .unwrap();
    reader.resume(None).unwrap();

    let w = waiter.clone();
    let closer = Coroutine::create(move |_| {
        wait::sleep(Duration::from_millis(20)).unwrap();
        w.close();
        None
    })
    .unwrap();
    closer.resume(None).unwrap();

    scheduler_close().unwrap();
    assert_eq!(result.get(), Some(Err(ErrorKind::Canceled)));
    assert_eq!(costack_core::Reactor::pending(&*reactor), 0);
}

#[test]
fn fd_readiness_resumes_reader() {
    start(DeadlockPolicy::ReturnError);
    let (rx, tx) = nix::unistd::pipe().unwrap();
    let got = Rc::new(Cell::new(Interest::NONE));

    let g = got.clone();
    let fd = rx.as_raw_fd();
    let reader = Coroutine::create(move |_| {
        g.set(costack_runtime::io::wait_readable(fd, Some(Duration::from_secs(5))).unwrap());
        None
    })
    .unwrap();
    reader.resume(None).unwrap();

    let writer = Coroutine::create(move |_| {
        wait::sleep(Duration::from_millis(10)).unwrap();
        nix::unistd::write(&tx, b"hello").unwrap();
        None
    })
    .unwrap();
    writer.resume(None).unwrap();

    scheduler_close().unwrap();
    assert!(got.get().contains(Interest::READABLE));
}

#[test]
fn wait_group_across_sleepers() {
    start(DeadlockPolicy::ReturnError);
    let wg = WaitGroup::new();
    wg.add(3).unwrap();

    for ms in [5u64, 15, 10] {
        let w = wg.clone();
        let co = Coroutine::create(move |_| {
            wait::sleep(Duration::from_millis(ms)).unwrap();
            w.done().unwrap();
            None
        })
        .unwrap();
        co.resume(None).unwrap();
    }

    let drained = Rc::new(Cell::new(false));
    let (w, d) = (wg.clone(), drained.clone());
    let waiter = Coroutine::create(move |_| {
        w.wait(Some(Duration::from_secs(5))).unwrap();
        d.set(true);
        None
    })
    .unwrap();
    waiter.resume(None).unwrap();

    scheduler_close().unwrap();
    assert!(drained.get());
    assert_eq!(wg.count(), 0);
}

#[test]
fn wait_group_timeout() {
    start(DeadlockPolicy::ReturnError);
    let wg = WaitGroup::new();
    wg.add(1).unwrap();
    let kind = Rc::new(Cell::new(None));

    let (w, k) = (wg.clone(), kind.clone());
    let co = Coroutine::create(move |_| {
        k.set(w.wait(Some(Duration::from_millis(20))).err().map(|e| e.kind()));
        None
    })
    .unwrap();
    co.resume(None).unwrap();

    scheduler_close().unwrap();
    assert_eq!(kind.get(), Some(ErrorKind::TimedOut));
    assert_eq!(wg.count(), 1);
}

#[test]
fn scheduler_cannot_close_itself() {
    let kind = Rc::new(Cell::new(None));
    let k = kind.clone();
    let hooks = SchedulerHooks::from_reactor(Rc::new(PollReactor::new().unwrap()))
        .policy(DeadlockPolicy::ReturnError)
        .on_deadlock(move || {
            // hooks run on the scheduler coroutine
            k.set(scheduler_close().err().map(|e| e.kind()));
        });
    scheduler_run(hooks).unwrap();

    let stuck = Coroutine::create(|_| {
        let _ = wait::wait_for(None);
        None
    })
    .unwrap();
    stuck.resume(None).unwrap();

    assert_eq!(scheduler_close().unwrap_err().kind(), ErrorKind::Deadlock);
    assert_eq!(kind.get(), Some(ErrorKind::Misuse));
}
