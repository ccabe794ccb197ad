//! printk-style logging for costack
//!
//! Leveled lines on stderr. A line written while a coroutine runs is
//! tagged with that coroutine's id, so interleaved output from many
//! coroutines on one thread can still be told apart.
//!
//! # Environment Variables
//!
//! - `COSTACK_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace (or 0-5)
//! - `COSTACK_FLUSH_EPRINT=1` - Flush stderr after each line (crash debugging)
//! - `COSTACK_LOG_TIME=1` - Prefix lines with seconds since first log
//!
//! # Usage
//!
//! ```ignore
//! use costack_core::{kinfo, kwarn};
//!
//! kinfo!("scheduler registered on {:?}", std::thread::current().id());
//! kwarn!("coroutine {} blocked for {:?}", id, elapsed);
//! ```

use std::cell::Cell;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Once, OnceLock};
use std::time::Instant;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "E",
            LogLevel::Warn => "W",
            LogLevel::Info => "I",
            LogLevel::Debug => "D",
            LogLevel::Trace => "T",
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        Self::ALL.get(v as usize).copied().ok_or(v)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return LogLevel::try_from(n).map_err(|n| format!("log level {} out of range", n));
        }
        if s.eq_ignore_ascii_case("warning") {
            return Ok(LogLevel::Warn);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log level {:?}", s))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Settings {
    level: AtomicU8,
    flush: AtomicBool,
    time: AtomicBool,
}

static SETTINGS: Settings = Settings {
    level: AtomicU8::new(LogLevel::Warn as u8),
    flush: AtomicBool::new(false),
    time: AtomicBool::new(false),
};
static ENV_LOADED: Once = Once::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

const NO_COROUTINE: u64 = u64::MAX;

thread_local! {
    static CURRENT_COROUTINE: Cell<u64> = const { Cell::new(NO_COROUTINE) };
}

/// Load settings from the environment
///
/// Runs once per process; the first log line triggers it otherwise.
/// Programmatic setters called later win over the environment.
pub fn init() {
    ENV_LOADED.call_once(|| {
        EPOCH.get_or_init(Instant::now);
        let flag = |key: &str| std::env::var(key).ok().map(|v| crate::env::is_truthy(&v));
        if let Some(on) = flag("COSTACK_FLUSH_EPRINT") {
            SETTINGS.flush.store(on, Ordering::Relaxed);
        }
        if let Some(on) = flag("COSTACK_LOG_TIME") {
            SETTINGS.time.store(on, Ordering::Relaxed);
        }
        if let Some(level) = std::env::var("COSTACK_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse::<LogLevel>().ok())
        {
            SETTINGS.level.store(level as u8, Ordering::Relaxed);
        }
    });
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::try_from(SETTINGS.level.load(Ordering::Relaxed)).unwrap_or(LogLevel::Trace)
}

pub fn set_log_level(level: LogLevel) {
    init();
    SETTINGS.level.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    SETTINGS.flush.store(enabled, Ordering::Relaxed);
}

/// Toggle the seconds-since-first-log prefix
pub fn set_time_enabled(enabled: bool) {
    init();
    SETTINGS.time.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

/// Tag subsequent lines from this thread with coroutine `id`
#[inline]
pub fn set_coroutine_id(id: u64) {
    CURRENT_COROUTINE.with(|c| c.set(id));
}

#[inline]
pub fn clear_coroutine_id() {
    CURRENT_COROUTINE.with(|c| c.set(NO_COROUTINE));
}

/// Everything the writer emits for one call
#[doc(hidden)]
pub struct Line<'a> {
    pub level: Option<LogLevel>,
    pub newline: bool,
    pub args: fmt::Arguments<'a>,
}

#[doc(hidden)]
pub fn _emit(line: Line<'_>) {
    if let Some(level) = line.level {
        if !level_enabled(level) {
            return;
        }
    } else {
        init();
    }

    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    if let Some(level) = line.level {
        let _ = write!(out, "[{}]", level.tag());
        if SETTINGS.time.load(Ordering::Relaxed) {
            let epoch = EPOCH.get_or_init(Instant::now);
            let _ = write!(out, "[{:.6}]", epoch.elapsed().as_secs_f64());
        }
        // try_with: a TLS destructor may log after the slot is gone
        let id = CURRENT_COROUTINE.try_with(Cell::get).unwrap_or(NO_COROUTINE);
        if id != NO_COROUTINE {
            let _ = write!(out, "[co:{}]", id);
        }
        let _ = out.write_all(b" ");
    }
    let _ = out.write_fmt(line.args);
    if line.newline {
        let _ = out.write_all(b"\n");
    }
    if SETTINGS.flush.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:expr, $newline:expr, $($arg:tt)*) => {
        $crate::kprint::_emit($crate::kprint::Line {
            level: $level,
            newline: $newline,
            args: format_args!($($arg)*),
        })
    };
}

/// Raw stderr write, no level and no newline
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => { $crate::__klog!(None, false, $($arg)*) };
}

#[macro_export]
macro_rules! kprintln {
    () => { $crate::__klog!(None, true, "") };
    ($($arg:tt)*) => { $crate::__klog!(None, true, $($arg)*) };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        $crate::__klog!(Some($crate::kprint::LogLevel::Error), true, $($arg)*)
    };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::__klog!(Some($crate::kprint::LogLevel::Warn), true, $($arg)*)
    };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        $crate::__klog!(Some($crate::kprint::LogLevel::Info), true, $($arg)*)
    };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        $crate::__klog!(Some($crate::kprint::LogLevel::Debug), true, $($arg)*)
    };
}

/// Most verbose; per-switch detail
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        $crate::__klog!(Some($crate::kprint::LogLevel::Trace), true, $($arg)*)
    };
}
