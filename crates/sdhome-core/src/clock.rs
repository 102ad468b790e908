//! Injectable clock, per the re-architecture note on testable time.

use chrono::{DateTime, Local, Utc};
use std::sync::{Arc, RwLock};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn now_local(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock whose value is set by the test and held fixed until advanced.
/// Used in automation-engine and state-sync tests that need deterministic
/// cooldown/time-trigger behavior.
#[derive(Clone)]
pub struct FixedClock {
    inner: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(at)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.write().expect("clock lock poisoned");
        *guard = *guard + delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.write().expect("clock lock poisoned") = at;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.inner.read().expect("clock lock poisoned")
    }

    fn now_local(&self) -> DateTime<Local> {
        self.now_utc().with_timezone(&Local)
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(Utc::now());
        let before = clock.now_utc();
        clock.advance(chrono::Duration::seconds(30));
        let after = clock.now_utc();
        assert_eq!((after - before).num_seconds(), 30);
    }
}
