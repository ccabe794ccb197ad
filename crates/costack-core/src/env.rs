//! Environment variable utilities
//!
//! Typed lookups with defaults, used by the runtime configuration layer.
//!
//! ```ignore
//! use costack_core::env::{env_get, env_get_bool, env_get_duration_ms};
//!
//! let stack: usize = env_get("COSTACK_STACK_SIZE", 256 * 1024);
//! let guard = env_get_bool("COSTACK_GUARD_PAGES", true);
//! let quantum = env_get_duration_ms("COSTACK_WATCHDOG_QUANTUM_MS", Duration::from_secs(5));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Values accepted as "true": 1, true, yes, on (case-insensitive)
#[inline]
pub fn is_truthy(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Get environment variable parsed as type T, or return default
///
/// Unset variables and values that fail to parse both give `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Set variables are judged by [`is_truthy`]; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => is_truthy(&val),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a millisecond count as a `Duration`
#[inline]
pub fn env_get_duration_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__COSTACK_UNSET_VAR__", 42);
        assert_eq!(val, 42);
        assert!(env_get_opt::<usize>("__COSTACK_UNSET_VAR__").is_none());
        assert_eq!(env_get_str("__COSTACK_UNSET_VAR__", "hello"), "hello");
        assert!(!env_is_set("__COSTACK_UNSET_VAR__"));
    }

    #[test]
    fn test_truthy() {
        for v in ["1", "true", "TRUE", "yes", "on", " on "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "false", "off", "garbage", ""] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__COSTACK_TEST_NUM__", " 123 ");
        let val: usize = env_get("__COSTACK_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__COSTACK_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__COSTACK_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__COSTACK_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__COSTACK_TEST_INVALID__");
    }

    #[test]
    fn test_env_get_duration() {
        std::env::set_var("__COSTACK_TEST_MS__", "250");
        assert_eq!(
            env_get_duration_ms("__COSTACK_TEST_MS__", Duration::ZERO),
            Duration::from_millis(250)
        );
        std::env::remove_var("__COSTACK_TEST_MS__");
        assert_eq!(
            env_get_duration_ms("__COSTACK_TEST_MS__", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
