//! Shared primitive types used across the engine.

use chrono::{DateTime, Utc};

/// A stable, unique identifier for an account.
pub type AccountId = String;

/// Wall-clock instant. All engine arithmetic is done against these.
pub type Timestamp = DateTime<Utc>;

/// Milliseconds in one minute. Coefficients are quoted per minute.
pub const MS_PER_MINUTE: f64 = 60_000.0;
