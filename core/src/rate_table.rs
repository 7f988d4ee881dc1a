//! Rate table and provisioning.
//!
//! A coefficient change never shifts the deadline directly. The balance
//! in effect at the moment of change is frozen first, then projected
//! forward under the new rate: continuous balance, new slope.

use crate::{
    depletion::{depleted_balance, project_deadline},
    error::{TimerError, TimerResult},
    record::AccountTimerRecord,
    types::Timestamp,
};

/// Change the rate at `now`. Non-positive values pause depletion:
/// the balance is frozen and the deadline cleared. NaN and infinities
/// are rejected.
pub fn set_coefficient(
    record: &AccountTimerRecord,
    value: f64,
    now: Timestamp,
) -> TimerResult<AccountTimerRecord> {
    validate_coefficient(value)?;

    let mut next = record.clone();
    next.balance = depleted_balance(record, now);
    next.coefficient = value;
    next.deadline = project_deadline(next.balance, value, now).map_err(|_| {
        TimerError::InvalidCoefficient(format!(
            "{value} is too small to carry a balance of {:.2}",
            next.balance
        ))
    })?;
    next.updated_at = now;
    Ok(next)
}

/// Provision a timer for `duration_minutes` at `coefficient`.
/// Overwrites whatever the record held.
pub fn set_initial_timer(
    record: &AccountTimerRecord,
    duration_minutes: f64,
    coefficient: f64,
    now: Timestamp,
) -> TimerResult<AccountTimerRecord> {
    require_active_rate(coefficient)?;
    if !duration_minutes.is_finite() || duration_minutes < 0.0 {
        return Err(TimerError::InvalidDuration(format!(
            "{duration_minutes} minutes is not a valid duration"
        )));
    }
    provision(record, duration_minutes * coefficient, coefficient, now)
}

/// Provision a timer from a balance: the admin "start timer" action.
/// Overwrites whatever the record held.
pub fn provision_balance(
    record: &AccountTimerRecord,
    balance: f64,
    coefficient: f64,
    now: Timestamp,
) -> TimerResult<AccountTimerRecord> {
    require_active_rate(coefficient)?;
    if !balance.is_finite() || balance < 0.0 {
        return Err(TimerError::InvalidAmount(format!(
            "{balance} is not a valid starting balance"
        )));
    }
    provision(record, balance, coefficient, now)
}

fn provision(
    record: &AccountTimerRecord,
    balance: f64,
    coefficient: f64,
    now: Timestamp,
) -> TimerResult<AccountTimerRecord> {
    let mut next = record.clone();
    next.balance = balance;
    next.coefficient = coefficient;
    next.deadline = project_deadline(balance, coefficient, now).map_err(|_| {
        TimerError::InvalidAmount(format!(
            "{balance} at {coefficient}/min runs past the representable range"
        ))
    })?;
    next.last_tick_at = Some(now);
    next.updated_at = now;
    Ok(next)
}

/// Any finite value is a valid coefficient; non-positive ones pause.
pub fn validate_coefficient(value: f64) -> TimerResult<()> {
    if !value.is_finite() {
        return Err(TimerError::InvalidCoefficient(format!("{value} is not finite")));
    }
    Ok(())
}

fn require_active_rate(coefficient: f64) -> TimerResult<()> {
    if !coefficient.is_finite() || coefficient <= 0.0 {
        return Err(TimerError::InvalidCoefficient(format!(
            "{coefficient} must be a positive finite rate"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn only_non_finite_coefficients_are_invalid() {
        assert!(validate_coefficient(2.5).is_ok());
        assert!(validate_coefficient(0.0).is_ok());
        assert!(validate_coefficient(-1.0).is_ok());
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                validate_coefficient(value),
                Err(TimerError::InvalidCoefficient(_))
            ));
        }
    }

    #[test]
    fn set_coefficient_rejects_nan_without_touching_the_record() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let record = AccountTimerRecord::new("a", 1.0, now);
        assert!(matches!(
            set_coefficient(&record, f64::NAN, now),
            Err(TimerError::InvalidCoefficient(_))
        ));
    }
}
