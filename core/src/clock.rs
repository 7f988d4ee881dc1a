//! Clock source — the only place the engine learns what time it is.
//!
//! RULE: Nothing in the engine may call `Utc::now()` directly.
//! Production wires a `SystemClock`; tests wire a `ManualClock`
//! and move it forward explicitly.

use crate::types::Timestamp;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same instant,
/// so a test can keep one handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { inner: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, at: Timestamp) {
        *self.lock() = at;
    }

    /// Move forward (or backward, for skew tests) by `by`.
    pub fn advance(&self, by: Duration) -> Timestamp {
        let mut now = self.lock();
        *now += by;
        *now
    }

    pub fn advance_secs(&self, secs: i64) -> Timestamp {
        self.advance(Duration::seconds(secs))
    }

    pub fn advance_minutes(&self, minutes: i64) -> Timestamp {
        self.advance(Duration::minutes(minutes))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timestamp> {
        // A poisoned lock still holds a valid instant.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.lock()
    }
}
