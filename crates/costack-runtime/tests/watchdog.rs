//! Watchdog against a coroutine that never yields

use costack_core::ErrorKind;
use costack_runtime::watchdog::{self, Watchdog, WatchdogConfig};
use costack_runtime::{yield_now, Coroutine};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn spin(d: Duration) {
    let start = Instant::now();
    while start.elapsed() < d {
        std::hint::spin_loop();
    }
}

#[test]
fn scenario_busy_coroutine_raises_alerts() {
    let alerts: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = alerts.clone();
    let config = WatchdogConfig::new(Duration::from_millis(50))
        .alerter(move |alert| sink.lock().unwrap().push(alert.alert_count));
    let wd = Watchdog::start(config).unwrap();

    let seen = alerts.clone();
    let seen_before_yield = Arc::new(Mutex::new(Vec::new()));
    let before = seen_before_yield.clone();
    let hog = Coroutine::create(move |_| {
        spin(Duration::from_millis(300));
        *before.lock().unwrap() = seen.lock().unwrap().clone();
        yield_now().unwrap();
        None
    })
    .unwrap();
    hog.resume(None).unwrap();
    hog.resume(None).unwrap();
    let stats = wd.stop();

    let counts = seen_before_yield.lock().unwrap().clone();
    assert!(counts.len() >= 4, "only {} alerts: {:?}", counts.len(), counts);
    assert!(counts.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(counts[0], 1);
    assert!(stats.alerts >= counts.len() as u64);
}

#[test]
fn yielding_engine_stays_quiet() {
    let alerts = Arc::new(Mutex::new(0u32));
    let sink = alerts.clone();
    let config = WatchdogConfig::new(Duration::from_millis(10))
        .alerter(move |_| *sink.lock().unwrap() += 1);
    let wd = Watchdog::start(config).unwrap();

    let co = Coroutine::create(|_| {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(100) {
            spin(Duration::from_millis(2));
            yield_now().unwrap();
        }
        None
    })
    .unwrap();
    // the last Ok resume runs it to completion; the next hits a freed slot
    while co.resume(None).is_ok() {}
    wd.stop();
    assert_eq!(*alerts.lock().unwrap(), 0);
}

#[test]
fn threshold_delays_alerts() {
    let alerts: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = alerts.clone();
    let config = WatchdogConfig::new(Duration::from_millis(20))
        .threshold(Duration::from_millis(100))
        .alerter(move |alert| sink.lock().unwrap().push(alert.blocked_for));
    let wd = Watchdog::start(config).unwrap();

    let hog = Coroutine::create(|_| {
        spin(Duration::from_millis(300));
        None
    })
    .unwrap();
    hog.resume(None).unwrap();
    wd.stop();

    let blocked = alerts.lock().unwrap().clone();
    assert!(!blocked.is_empty());
    assert!(blocked.iter().all(|d| *d >= Duration::from_millis(100)));
}

#[test]
fn global_watchdog_is_a_singleton() {
    assert_eq!(watchdog::stop().unwrap_err().kind(), ErrorKind::Misuse);

    watchdog::run(WatchdogConfig::new(Duration::from_millis(20))).unwrap();
    assert!(watchdog::is_running());
    let again = watchdog::run(WatchdogConfig::new(Duration::from_millis(20))).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Misuse);

    watchdog::stop().unwrap();
    assert!(!watchdog::is_running());
}
