//! Watchdog thread
//!
//! Detects a wedged engine from a second OS thread. Every quantum it
//! compares the engine's round counter with the value it saw last time.
//! If nothing switched, the running coroutine is not the scheduler, and
//! other coroutines exist, someone is hogging the thread (a CPU loop or a
//! blocking syscall) and the alerter is called.
//!
//! # Design
//!
//! The watchdog only reads the [`EngineSnapshot`] atomics, so the check is
//! racy by nature: a switch landing exactly on a tick boundary may cause
//! a false alert or hide one quantum of stall. It never interrupts the
//! engine; it only reports.

use crate::engine::{self, EngineSnapshot};
use crate::parking::Parker;
use costack_core::env::env_get_duration_ms;
use costack_core::{kdebug, kinfo, kwarn, CoroutineId, EngineError, EngineResult, ErrorKind};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::defaults;

/// Alerter callback, run on the watchdog thread
pub type Alerter = Box<dyn FnMut(&WatchdogAlert) + Send>;

/// One stall report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogAlert {
    /// Consecutive stalled quanta, starting at 1
    pub alert_count: u64,
    /// Approximate time the engine has not switched
    pub blocked_for: Duration,
    /// Round the engine is stuck at
    pub round: u64,
    /// Coroutine running while stuck
    pub coroutine: CoroutineId,
}

impl fmt::Display for WatchdogAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coroutine {} blocked for {:?} (round {}, alert #{})",
            self.coroutine, self.blocked_for, self.round, self.alert_count
        )
    }
}

/// Watchdog settings
pub struct WatchdogConfig {
    /// Check interval
    pub quantum: Duration,
    /// Stall time before the alerter is called; zero alerts on every
    /// stalled quantum
    pub threshold: Duration,
    /// `None` logs a warning
    pub alerter: Option<Alerter>,
}

impl WatchdogConfig {
    pub fn new(quantum: Duration) -> Self {
        Self {
            quantum,
            threshold: Duration::ZERO,
            alerter: None,
        }
    }

    /// Compile-time defaults with `COSTACK_WATCHDOG_QUANTUM_MS` and
    /// `COSTACK_WATCHDOG_THRESHOLD_MS` overrides
    pub fn from_env() -> Self {
        Self {
            quantum: env_get_duration_ms(
                "COSTACK_WATCHDOG_QUANTUM_MS",
                Duration::from_millis(defaults::WATCHDOG_QUANTUM_MS),
            ),
            threshold: env_get_duration_ms(
                "COSTACK_WATCHDOG_THRESHOLD_MS",
                Duration::from_millis(defaults::WATCHDOG_THRESHOLD_MS),
            ),
            alerter: None,
        }
    }

    pub fn threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn alerter<F>(mut self, f: F) -> Self
    where
        F: FnMut(&WatchdogAlert) + Send + 'static,
    {
        self.alerter = Some(Box::new(f));
        self
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for WatchdogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchdogConfig")
            .field("quantum", &self.quantum)
            .field("threshold", &self.threshold)
            .field("alerter", &self.alerter.is_some())
            .finish()
    }
}

/// Counters returned when the watchdog stops
#[derive(Debug, Clone, Default)]
pub struct WatchdogStats {
    pub ticks: u64,
    pub alerts: u64,
}

struct Shared {
    stop: AtomicBool,
    parker: Parker,
}

/// Running watchdog attached to one engine
pub struct Watchdog {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<WatchdogStats>>,
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("stopping", &self.shared.stop.load(Ordering::Relaxed))
            .field("attached", &self.handle.is_some())
            .finish()
    }
}

impl Watchdog {
    /// Watch the calling thread's engine
    pub fn start(config: WatchdogConfig) -> EngineResult<Watchdog> {
        Self::attach(engine::snapshot(), config)
    }

    /// Watch the engine behind `snapshot`
    pub fn attach(snapshot: Arc<EngineSnapshot>, config: WatchdogConfig) -> EngineResult<Watchdog> {
        if config.quantum.is_zero() {
            return Err(EngineError::new(
                ErrorKind::InvalidValue,
                "watchdog quantum must be non-zero",
            ));
        }
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            parker: Parker::new(),
        });
        let thread_shared = Arc::clone(&shared);

        kinfo!(
            "starting watchdog: quantum {:?}, threshold {:?}",
            config.quantum,
            config.threshold
        );
        let handle = thread::Builder::new()
            .name("costack-watchdog".into())
            .spawn(move || watchdog_loop(snapshot, config, thread_shared))
            .map_err(|e| EngineError::syscall("spawning the watchdog thread", e))?;

        Ok(Watchdog {
            shared,
            handle: Some(handle),
        })
    }

    /// Cut the current sleep short, join the thread
    pub fn stop(mut self) -> WatchdogStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> WatchdogStats {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.parker.unpark();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                kwarn!("watchdog thread panicked");
                WatchdogStats::default()
            }
            None => WatchdogStats::default(),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

/// Stall tracking across ticks
struct Tracker {
    quantum: Duration,
    threshold: Duration,
    last_round: Option<u64>,
    alert_count: u64,
}

impl Tracker {
    fn new(quantum: Duration, threshold: Duration) -> Self {
        Self {
            quantum,
            threshold,
            last_round: None,
            alert_count: 0,
        }
    }

    /// Feed one observation; returns the alert to raise, if any
    fn observe(
        &mut self,
        round: u64,
        current: CoroutineId,
        scheduler: CoroutineId,
        count: usize,
    ) -> Option<WatchdogAlert> {
        let stalled = self.last_round == Some(round) && current != scheduler && count > 1;
        self.last_round = Some(round);
        if !stalled {
            self.alert_count = 0;
            return None;
        }
        self.alert_count += 1;
        let blocked_for = self.quantum.saturating_mul(self.alert_count as u32);
        if blocked_for < self.threshold {
            return None;
        }
        Some(WatchdogAlert {
            alert_count: self.alert_count,
            blocked_for,
            round,
            coroutine: current,
        })
    }
}

fn watchdog_loop(
    snapshot: Arc<EngineSnapshot>,
    mut config: WatchdogConfig,
    shared: Arc<Shared>,
) -> WatchdogStats {
    let mut tracker = Tracker::new(config.quantum, config.threshold);
    let mut stats = WatchdogStats::default();

    loop {
        shared.parker.park_timeout(config.quantum);
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        stats.ticks += 1;

        let alert = tracker.observe(
            snapshot.round(),
            snapshot.current(),
            snapshot.scheduler(),
            snapshot.count(),
        );
        if let Some(alert) = alert {
            stats.alerts += 1;
            match config.alerter.as_mut() {
                Some(alerter) => alerter(&alert),
                None => kwarn!("watchdog: {}", alert),
            }
        }
    }

    kdebug!("watchdog stopped after {} ticks, {} alerts", stats.ticks, stats.alerts);
    stats
}

// ----------------------------------------------------------------------
// Process-wide singleton
// ----------------------------------------------------------------------

static GLOBAL: Mutex<Option<Watchdog>> = Mutex::new(None);

/// Start the process watchdog on the calling thread's engine
///
/// `Misuse` if one is already running.
pub fn run(config: WatchdogConfig) -> EngineResult<()> {
    let mut global = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    if global.is_some() {
        return Err(EngineError::misuse("watchdog is already running"));
    }
    *global = Some(Watchdog::start(config)?);
    Ok(())
}

/// Stop the process watchdog; `Misuse` if it is not running
pub fn stop() -> EngineResult<WatchdogStats> {
    let watchdog = GLOBAL.lock().unwrap_or_else(|e| e.into_inner()).take();
    match watchdog {
        Some(watchdog) => Ok(watchdog.stop()),
        None => Err(EngineError::misuse("watchdog is not running")),
    }
}

pub fn is_running() -> bool {
    GLOBAL.lock().unwrap_or_else(|e| e.into_inner()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHED: CoroutineId = CoroutineId::SCHEDULER;
    const USER: CoroutineId = CoroutineId::FIRST_USER;

    #[test]
    fn test_tracker_alerts_on_stall() {
        let q = Duration::from_millis(50);
        let mut t = Tracker::new(q, Duration::ZERO);

        assert!(t.observe(7, USER, SCHED, 2).is_none());
        let a = t.observe(7, USER, SCHED, 2).unwrap();
        assert_eq!(a.alert_count, 1);
        assert_eq!(a.blocked_for, q);
        let a = t.observe(7, USER, SCHED, 2).unwrap();
        assert_eq!(a.alert_count, 2);
        assert_eq!(a.coroutine, USER);

        // progress resets
        assert!(t.observe(8, USER, SCHED, 2).is_none());
        assert_eq!(t.observe(8, USER, SCHED, 2).unwrap().alert_count, 1);
    }

    #[test]
    fn test_tracker_ignores_idle_scheduler_and_lone_main() {
        let mut t = Tracker::new(Duration::from_millis(10), Duration::ZERO);
        t.observe(3, SCHED, SCHED, 2);
        assert!(t.observe(3, SCHED, SCHED, 2).is_none());
        assert!(t.observe(3, CoroutineId::MAIN, SCHED, 1).is_none());
    }

    #[test]
    fn test_tracker_threshold() {
        let mut t = Tracker::new(Duration::from_millis(10), Duration::from_millis(30));
        t.observe(1, USER, SCHED, 2);
        assert!(t.observe(1, USER, SCHED, 2).is_none());
        assert!(t.observe(1, USER, SCHED, 2).is_none());
        let a = t.observe(1, USER, SCHED, 2).unwrap();
        assert_eq!(a.alert_count, 3);
        assert_eq!(a.blocked_for, Duration::from_millis(30));
    }

    #[test]
    fn test_zero_quantum_is_invalid() {
        let err = Watchdog::start(WatchdogConfig::new(Duration::ZERO)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_stop_cuts_sleep_short() {
        let wd = Watchdog::start(WatchdogConfig::new(Duration::from_secs(60))).unwrap();
        let start = std::time::Instant::now();
        let stats = wd.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.ticks, 0);
    }
}
