//! Timed parking for helper OS threads
//!
//! The watchdog thread sleeps one quantum at a time and must wake at once
//! when asked to stop. A mutex-protected flag plus a condvar gives both.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-slot park/unpark signal
pub struct Parker {
    /// true = unpark pending
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Sleep until `timeout` passes or [`unpark`](Self::unpark) is called
    ///
    /// Returns `true` if woken by `unpark`. A pending unpark is consumed
    /// and returns at once; spurious condvar wakeups are absorbed.
    pub fn park_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *signaled {
                *signaled = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(signaled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            signaled = guard;
        }
    }

    /// Wake the parked thread, or make its next park return at once
    pub fn unpark(&self) {
        {
            let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
            *signaled = true;
        }
        self.condvar.notify_one();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_park_timeout() {
        let parker = Parker::new();
        let start = Instant::now();
        assert!(!parker.park_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_unpark_before_park() {
        let parker = Parker::new();
        parker.unpark();
        assert!(parker.park_timeout(Duration::from_secs(10)));
        // consumed
        assert!(!parker.park_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_unpark_wakes_other_thread() {
        let parker = Arc::new(Parker::new());
        let p = Arc::clone(&parker);

        let handle = thread::spawn(move || p.park_timeout(Duration::from_secs(10)));

        // Give thread time to park
        thread::sleep(Duration::from_millis(50));
        parker.unpark();

        assert!(handle.join().unwrap());
    }
}
