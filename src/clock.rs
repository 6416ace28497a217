//! Injectable time source
//!
//! Billing decisions are all functions of "now". The sweeps and the
//! lifecycle manager take a [`Clock`] instead of calling `Utc::now()`
//! directly so tests can drive a subscription through weeks of billing
//! history deterministically.

use std::sync::atomic::{AtomicI64, Ordering};

/// Epoch-seconds time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock time via chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
