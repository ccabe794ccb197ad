//! Basic costack example
//!
//! Payload ping-pong between two coroutines, then a handful of sleepers
//! and a pipe reader driven by the scheduler's poll reactor.
//!
//! # Environment Variables
//!
//! - `COSTACK_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `COSTACK_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use costack::{io, kdebug, kinfo, sleep, spawn, yield_with, Coroutine, Runtime, WaitGroup};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

// COSTACK_LOG_LEVEL=debug cargo run -p costack-basic
fn main() {
    println!("=== costack Basic Example ===\n");

    ping_pong();

    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("runtime: {}", e);
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    let result = runtime.block_on(|| {
        let wg = WaitGroup::new();

        for (i, ms) in [30u64, 10, 20].into_iter().enumerate() {
            wg.add(1).ok();
            let w = wg.clone();
            spawn(move |_| {
                kdebug!("[sleeper {}] sleeping {}ms", i, ms);
                sleep(Duration::from_millis(ms)).ok();
                println!("sleeper {} woke after {}ms", i, ms);
                w.done().ok();
                None
            })
            .ok();
        }

        let pipe = nix::unistd::pipe();
        if let Ok((rx, tx)) = pipe {
            let rx = Rc::new(rx);
            let fd = rx.as_raw_fd();
            spawn(move |_| {
                match io::wait_readable(fd, Some(Duration::from_secs(1))) {
                    Ok(ready) => println!("pipe ready: {:?}", ready),
                    Err(e) => println!("pipe wait failed: {}", e),
                }
                drop(rx);
                None
            })
            .ok();
            spawn(move |_| {
                sleep(Duration::from_millis(15)).ok();
                nix::unistd::write(&tx, b"x").ok();
                None
            })
            .ok();
        }

        match wg.wait(Some(Duration::from_secs(1))) {
            Ok(()) => kinfo!("all sleepers done"),
            Err(e) => kinfo!("wait group: {}", e),
        }
    });

    match result {
        Ok(()) => println!("\nfinished in {:?}", start.elapsed()),
        Err(e) => println!("\nruntime error: {}", e),
    }
    println!("\n=== Example Complete ===");
}

fn ping_pong() {
    let counter = Coroutine::create(|data| {
        let mut n = data.and_then(|d| d.downcast::<u32>().ok()).map_or(0, |b| *b);
        while n < 5 {
            n += 1;
            match yield_with(Some(Box::new(n))) {
                Ok(Some(back)) => n = back.downcast::<u32>().map_or(n, |b| *b),
                _ => break,
            }
        }
        None
    });
    let counter = match counter {
        Ok(co) => co,
        Err(e) => {
            eprintln!("create: {}", e);
            return;
        }
    };

    let mut data: Option<costack::Payload> = Some(Box::new(0u32));
    loop {
        match counter.resume(data.take()) {
            Ok(Some(out)) => {
                let n = out.downcast::<u32>().map_or(0, |b| *b);
                println!("main got {}", n);
                data = Some(Box::new(n * 2));
            }
            Ok(None) => break,
            Err(e) => {
                println!("resume: {}", e);
                break;
            }
        }
    }
    println!();
}
