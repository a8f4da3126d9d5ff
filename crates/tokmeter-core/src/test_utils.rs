//! Helpers for unit tests that read `TOKMETER_*` variables
//!
//! Integration tests under tests/ keep their own helpers in tests/common.

use once_cell::sync::Lazy;
use std::env;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Every variable `TrackerConfig::from_env` reads
pub const TOKMETER_ENV_VARS: &[&str] = &[
    "TOKMETER_USER_ID",
    "TOKMETER_SESSION_ID",
    "TOKMETER_CURRENCY",
    "TOKMETER_NO_PERSIST",
    "TOKMETER_DATA_FILE",
    "TOKMETER_EXCHANGE_RATE_FILE",
    "TOKMETER_EXCHANGE_RATE_URL",
    "TOKMETER_EXCHANGE_RATE_EXPIRY_HOURS",
    "TOKMETER_WEBHOOK_URL",
    "TOKMETER_SESSION_BUDGET",
    "TOKMETER_SESSION_TTL_SECS",
];

/// Exclusive, clean `TOKMETER_*` environment for one test
///
/// Holds a process-wide lock, unsets every tokmeter variable on creation and
/// puts the previous values back on drop.
pub struct TokmeterEnv {
    saved: Vec<(&'static str, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl TokmeterEnv {
    pub fn clean() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let saved = TOKMETER_ENV_VARS
            .iter()
            .map(|key| (*key, env::var(key).ok()))
            .collect();

        // set_var/remove_var are unsafe since the 2024 edition; the lock
        // serializes every test that touches them
        for key in TOKMETER_ENV_VARS {
            unsafe { env::remove_var(key) };
        }

        Self { saved, _lock: lock }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        debug_assert!(TOKMETER_ENV_VARS.contains(&key), "{key} is not restored on drop");
        unsafe { env::set_var(key, value) };
    }
}

impl Drop for TokmeterEnv {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            unsafe {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
