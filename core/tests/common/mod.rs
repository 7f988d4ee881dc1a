//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use balance_timer_core::{
    dispatch::{DispatchError, LowBalanceNotice, NotificationDispatch},
    engine::TimerEngine,
    error::{TimerError, TimerResult},
    ledger::RemoteLedger,
    record::TopupEntry,
};
use std::sync::{Arc, Mutex};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn build() -> (TimerEngine, balance_timer_core::clock::ManualClock) {
    init_logging();
    TimerEngine::build_test().expect("build test engine")
}

pub fn assert_close(actual: f64, expected: f64, eps: f64) {
    assert!(
        (actual - expected).abs() <= eps,
        "expected {expected}, got {actual} (eps {eps})"
    );
}

/// Records every notice it is asked to send. Clones share the log.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    sent:     Arc<Mutex<Vec<LowBalanceNotice>>>,
    attempts: Arc<Mutex<usize>>,
    fail:     bool,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn sent(&self) -> Vec<LowBalanceNotice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl NotificationDispatch for RecordingDispatcher {
    fn send(&self, notice: &LowBalanceNotice) -> Result<(), DispatchError> {
        *self.attempts.lock().unwrap() += 1;
        if self.fail {
            return Err(DispatchError::Other("smtp relay unreachable".into()));
        }
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// In-process stand-in for the admin action service.
#[derive(Clone, Default)]
pub struct MockLedger {
    pub recorded: Arc<Mutex<Vec<TopupEntry>>>,
    pub balance:  Arc<Mutex<Option<f64>>>,
    pub down:     bool,
}

impl MockLedger {
    pub fn down() -> Self {
        Self { down: true, ..Self::default() }
    }

    pub fn set_balance(&self, balance: Option<f64>) {
        *self.balance.lock().unwrap() = balance;
    }
}

impl RemoteLedger for MockLedger {
    fn record_topup(&self, entry: &TopupEntry) -> TimerResult<()> {
        if self.down {
            return Err(TimerError::RemoteLedger("503 Service Unavailable".into()));
        }
        self.recorded.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn fetch_balance(&self, _account_id: &str) -> TimerResult<Option<f64>> {
        if self.down {
            return Err(TimerError::RemoteLedger("503 Service Unavailable".into()));
        }
        Ok(*self.balance.lock().unwrap())
    }
}
