//! Depletion — re-derives balance from the absolute deadline.
//!
//! Every tick is a full recomputation:
//!
//! ```text
//! balance = max(0, (deadline - now) / 60_000 * coefficient)
//! ```
//!
//! Never an incremental decrement. A tick after a long gap lands on
//! exactly the balance that one-second ticks would have produced,
//! because nothing here reads the previous balance.
//!
//! Everything in this module is pure. Persistence happens in engine.rs.

use crate::{
    record::{AccountTimerRecord, Countdown},
    types::{Timestamp, MS_PER_MINUTE},
};
use chrono::Duration;

/// Result of one tick over one record.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub record:           AccountTimerRecord,
    /// Balance persisted before this tick (last observed value).
    pub previous_balance: f64,
    /// The deadline passed during this tick and was cleared.
    pub expired:          bool,
    /// Set when `now` was earlier than the record's last tick.
    pub skew_ms:          Option<i64>,
}

/// Milliseconds left on a running timer, or `None` if nothing runs.
/// May be negative once the deadline has passed.
pub fn remaining_ms(record: &AccountTimerRecord, now: Timestamp) -> Option<i64> {
    if record.coefficient <= 0.0 {
        return None;
    }
    record
        .deadline
        .map(|deadline| (deadline - now).num_milliseconds())
}

/// Balance implied by the record at `now`.
/// Records that are not running keep their stored balance.
pub fn depleted_balance(record: &AccountTimerRecord, now: Timestamp) -> f64 {
    match remaining_ms(record, now) {
        Some(ms) if ms > 0 => balance_for_remaining(ms, record.coefficient),
        Some(_) => 0.0,
        None => record.balance,
    }
}

/// Convert remaining milliseconds to currency. Clamped at zero:
/// float drift near expiry must never produce a negative balance.
pub fn balance_for_remaining(remaining_ms: i64, coefficient: f64) -> f64 {
    ((remaining_ms as f64 / MS_PER_MINUTE) * coefficient).max(0.0)
}

/// The projected deadline would fall outside the representable
/// timestamp range: the balance is too large for the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineOutOfRange;

/// Project a balance forward into a deadline under `coefficient`.
/// `Ok(None)` when the rate cannot carry a countdown.
pub fn project_deadline(
    balance: f64,
    coefficient: f64,
    now: Timestamp,
) -> Result<Option<Timestamp>, DeadlineOutOfRange> {
    if coefficient <= 0.0 || !coefficient.is_finite() || balance <= 0.0 {
        return Ok(None);
    }
    let ms = (balance / coefficient * MS_PER_MINUTE).round();
    if !ms.is_finite() || ms >= i64::MAX as f64 {
        return Err(DeadlineOutOfRange);
    }
    let delta = Duration::try_milliseconds(ms as i64).ok_or(DeadlineOutOfRange)?;
    now.checked_add_signed(delta)
        .map(Some)
        .ok_or(DeadlineOutOfRange)
}

/// Recompute one record at `now`.
///
/// If `now` is behind the last observed tick the clock has skewed
/// backwards; the tick clamps to the last observed instant so the
/// balance can never climb back up, and reports the skew.
pub fn tick(record: &AccountTimerRecord, now: Timestamp) -> TickOutcome {
    let previous_balance = record.balance;
    let mut next = record.clone();

    let (effective_now, skew_ms) = match record.last_tick_at {
        Some(last) if now < last => (last, Some((last - now).num_milliseconds())),
        _ => (now, None),
    };

    let mut expired = false;
    if let Some(ms) = remaining_ms(record, effective_now) {
        if ms > 0 {
            next.balance = balance_for_remaining(ms, record.coefficient);
        } else {
            next.balance = 0.0;
            next.deadline = None;
            expired = true;
        }
    }

    next.last_tick_at = Some(effective_now);

    TickOutcome {
        record: next,
        previous_balance,
        expired,
        skew_ms,
    }
}

/// Display countdown at `now`, derived from the same deadline.
pub fn countdown(record: &AccountTimerRecord, now: Timestamp) -> Countdown {
    remaining_ms(record, now)
        .map(Countdown::from_remaining_ms)
        .unwrap_or_default()
}
