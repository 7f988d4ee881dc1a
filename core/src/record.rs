//! The per-account timer record and the small value types around it.
//!
//! RULE: `balance` and `deadline` are two encodings of the same
//! remaining time-credit. Every mutation in depletion.rs, topup.rs and
//! rate_table.rs rewrites both together and persists them as one row.

use crate::types::{AccountId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountTimerRecord {
    pub account_id:        AccountId,
    /// Currency units per minute. `<= 0` pauses depletion.
    pub coefficient:       f64,
    /// Instant the balance reaches zero. `None` when no timer runs.
    pub deadline:          Option<Timestamp>,
    pub balance:           f64,
    pub notification_sent: bool,
    pub last_tick_at:      Option<Timestamp>,
    pub updated_at:        Timestamp,
}

impl AccountTimerRecord {
    /// A freshly provisioned account: default rate, no running timer.
    pub fn new(account_id: impl Into<AccountId>, coefficient: f64, now: Timestamp) -> Self {
        Self {
            account_id: account_id.into(),
            coefficient,
            deadline: None,
            balance: 0.0,
            notification_sent: false,
            last_tick_at: None,
            updated_at: now,
        }
    }

    /// True when the record is actively depleting.
    pub fn is_running(&self) -> bool {
        self.coefficient > 0.0 && self.deadline.is_some()
    }
}

/// Who an account belongs to and where to reach them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountContact {
    pub username: String,
    pub email:    Option<String>,
    pub phone:    Option<String>,
}

/// One immutable line of the top-up ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopupEntry {
    pub id:           String,
    pub account_id:   AccountId,
    pub amount:       f64,
    pub initiated_by: String,
    pub created_at:   Timestamp,
}

impl TopupEntry {
    pub fn new(
        account_id: impl Into<AccountId>,
        amount: f64,
        initiated_by: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            amount,
            initiated_by: initiated_by.into(),
            created_at,
        }
    }
}

/// Remaining time split into display units. Presentation only.
/// Never feed this back into balance arithmetic.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Countdown {
    pub days:    i64,
    pub hours:   i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Countdown {
    pub fn from_remaining_ms(remaining_ms: i64) -> Self {
        if remaining_ms <= 0 {
            return Self::default();
        }
        let total_secs = remaining_ms / 1000;
        Self {
            days:    total_secs / 86_400,
            hours:   (total_secs / 3_600) % 24,
            minutes: (total_secs / 60) % 60,
            seconds: total_secs % 60,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl std::fmt::Display for Countdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}d {:02}h {:02}m {:02}s",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_floor_divides_units() {
        // 1 day, 2 hours, 3 minutes, 4.9 seconds
        let ms = ((86_400 + 2 * 3_600 + 3 * 60 + 4) * 1000 + 900) as i64;
        let c = Countdown::from_remaining_ms(ms);
        assert_eq!(c, Countdown { days: 1, hours: 2, minutes: 3, seconds: 4 });
        assert_eq!(c.to_string(), "1d 02h 03m 04s");
    }

    #[test]
    fn countdown_is_zero_after_deadline() {
        assert!(Countdown::from_remaining_ms(-5_000).is_zero());
        assert!(Countdown::from_remaining_ms(0).is_zero());
    }
}
