//! Threshold notifier — at-most-once low-balance warnings.
//!
//! Two states, carried by `notification_sent` on the record:
//!
//!   Normal ──(tick drops balance from >= T to (0, T))──▶ BelowThreshold
//!   BelowThreshold ──(balance back to >= T)──────────────▶ Normal
//!
//! Only a downward crossing fires. An account that starts below the
//! threshold (a small first top-up) never crossed anything and stays
//! quiet. Zero is expiry, not a warning.

use crate::record::AccountTimerRecord;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOW_BALANCE_THRESHOLD: f64 = 1000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdState {
    Normal,
    BelowThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdTransition {
    Unchanged,
    /// Normal → BelowThreshold. The caller owes one dispatch.
    Crossed,
    /// BelowThreshold → Normal. Re-arms the next crossing.
    Recovered,
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdNotifier {
    threshold: f64,
}

impl Default for ThresholdNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_BALANCE_THRESHOLD)
    }
}

impl ThresholdNotifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn state(&self, record: &AccountTimerRecord) -> ThresholdState {
        if record.notification_sent {
            ThresholdState::BelowThreshold
        } else {
            ThresholdState::Normal
        }
    }

    /// Observe a tick's recomputed balance against the balance persisted
    /// before it. Updates the flag in place.
    ///
    /// The flag flips on `Crossed` whether or not the dispatch that
    /// follows succeeds; delivery is best-effort and never retried.
    pub fn observe_tick(
        &self,
        previous_balance: f64,
        record: &mut AccountTimerRecord,
    ) -> ThresholdTransition {
        if let ThresholdTransition::Recovered = self.observe_credit(record) {
            return ThresholdTransition::Recovered;
        }

        let crossed = !record.notification_sent
            && previous_balance >= self.threshold
            && record.balance < self.threshold
            && record.balance > 0.0;

        if crossed {
            record.notification_sent = true;
            ThresholdTransition::Crossed
        } else {
            ThresholdTransition::Unchanged
        }
    }

    /// Observe a balance raised by a top-up, provisioning or
    /// reconciliation. Can only ever recover, never cross.
    pub fn observe_credit(&self, record: &mut AccountTimerRecord) -> ThresholdTransition {
        if record.notification_sent && record.balance >= self.threshold {
            record.notification_sent = false;
            ThresholdTransition::Recovered
        } else {
            ThresholdTransition::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(balance: f64, sent: bool) -> AccountTimerRecord {
        let mut r = AccountTimerRecord::new("n", 1.0, Utc::now());
        r.balance = balance;
        r.notification_sent = sent;
        r
    }

    #[test]
    fn crossing_fires_once() {
        let n = ThresholdNotifier::default();
        let mut r = record(999.0, false);
        assert_eq!(n.observe_tick(1000.0, &mut r), ThresholdTransition::Crossed);
        assert_eq!(n.state(&r), ThresholdState::BelowThreshold);

        r.balance = 998.0;
        assert_eq!(n.observe_tick(999.0, &mut r), ThresholdTransition::Unchanged);
    }

    #[test]
    fn expiry_to_zero_is_not_a_warning() {
        let n = ThresholdNotifier::default();
        let mut r = record(0.0, false);
        assert_eq!(n.observe_tick(1500.0, &mut r), ThresholdTransition::Unchanged);
        assert!(!r.notification_sent);
    }

    #[test]
    fn credit_recovers_only_at_or_above_threshold() {
        let n = ThresholdNotifier::default();
        let mut r = record(999.99, true);
        assert_eq!(n.observe_credit(&mut r), ThresholdTransition::Unchanged);
        r.balance = 1000.0;
        assert_eq!(n.observe_credit(&mut r), ThresholdTransition::Recovered);
        assert_eq!(n.state(&r), ThresholdState::Normal);
    }
}
