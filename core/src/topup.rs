//! Top-up processing — credits re-projected into a new deadline.
//!
//! A top-up is additive: the balance still left at `now` (derived from
//! the deadline, not read from the last persisted value) plus the
//! credit, converted back to minutes under the current coefficient.
//!
//! Validation happens before anything is touched. A rejected top-up
//! leaves the record exactly as it was.

use crate::{
    depletion::{depleted_balance, project_deadline},
    error::{TimerError, TimerResult},
    record::AccountTimerRecord,
    types::Timestamp,
};

/// Parse an amount coming from a form field or IPC payload.
pub fn parse_amount(raw: &str) -> TimerResult<f64> {
    let amount: f64 = raw
        .trim()
        .replace(',', ".")
        .parse()
        .map_err(|_| TimerError::InvalidAmount(format!("'{raw}' is not a number")))?;
    validate_amount(amount)?;
    Ok(amount)
}

pub fn validate_amount(amount: f64) -> TimerResult<()> {
    if !amount.is_finite() {
        return Err(TimerError::InvalidAmount(format!("{amount} is not finite")));
    }
    if amount <= 0.0 {
        return Err(TimerError::InvalidAmount(format!("{amount} must be positive")));
    }
    Ok(())
}

/// Apply a credit of `amount` at `now`. Returns the updated record.
///
/// With a non-positive coefficient the credit is banked as balance and
/// no countdown is started.
pub fn apply_topup(
    record: &AccountTimerRecord,
    amount: f64,
    now: Timestamp,
) -> TimerResult<AccountTimerRecord> {
    validate_amount(amount)?;

    let mut next = record.clone();
    next.balance = depleted_balance(record, now) + amount;
    next.deadline = project_deadline(next.balance, record.coefficient, now).map_err(|_| {
        TimerError::InvalidAmount(format!(
            "{amount} pushes the deadline past the representable range"
        ))
    })?;
    next.updated_at = now;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_decimal_comma() {
        assert_eq!(parse_amount(" 150,5 ").unwrap(), 150.5);
    }

    #[test]
    fn parse_rejects_garbage_and_non_positive() {
        assert!(matches!(parse_amount("abc"), Err(TimerError::InvalidAmount(_))));
        assert!(matches!(parse_amount("0"), Err(TimerError::InvalidAmount(_))));
        assert!(matches!(parse_amount("-10"), Err(TimerError::InvalidAmount(_))));
        assert!(matches!(parse_amount("NaN"), Err(TimerError::InvalidAmount(_))));
        assert!(matches!(parse_amount("inf"), Err(TimerError::InvalidAmount(_))));
    }
}
