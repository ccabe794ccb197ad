//! Watchdog demo
//!
//! One coroutine spins without yielding; the watchdog thread notices the
//! round counter standing still and raises an alert every quantum.
//!
//! # Environment Variables
//!
//! - `COSTACK_WATCHDOG_QUANTUM_MS` - Sampling interval (default 100 here)
//! - `COSTACK_WATCHDOG_THRESHOLD_MS` - Stall length before the first alert (default 0)
//! - `HOG_MS` - How long the hog spins (default 500)

use costack::{env_get, kinfo, sleep, spawn, Runtime, WatchdogConfig};
use std::time::{Duration, Instant};

fn main() {
    println!("=== costack Watchdog Demo ===\n");

    let hog_ms: u64 = env_get("HOG_MS", 500);
    let quantum: u64 = env_get("COSTACK_WATCHDOG_QUANTUM_MS", 100);
    let threshold: u64 = env_get("COSTACK_WATCHDOG_THRESHOLD_MS", 0);
    let config = WatchdogConfig::new(Duration::from_millis(quantum))
        .threshold(Duration::from_millis(threshold))
        .alerter(|alert| println!("  ALERT: {}", alert));

    let runtime = match Runtime::builder().watchdog(config).build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(move || {
        spawn(|_| {
            for i in 0..3 {
                kinfo!("polite coroutine, step {}", i);
                if sleep(Duration::from_millis(20)).is_err() {
                    break;
                }
            }
            None
        })
        .ok();

        spawn(move |_| {
            println!("hog: spinning for {}ms without yielding", hog_ms);
            let start = Instant::now();
            while start.elapsed() < Duration::from_millis(hog_ms) {
                std::hint::spin_loop();
            }
            println!("hog: done");
            None
        })
        .ok();
    });

    if let Err(e) = result {
        println!("runtime error: {}", e);
    }
    println!("\n=== Demo Complete ===");
}
