//! Balance-depletion timer engine.
//!
//! Prepaid accounts hold a balance that burns down at a per-minute
//! coefficient. The balance and the deadline at which it reaches zero
//! are kept as two encodings of the same remaining credit; every tick
//! re-derives the balance from the deadline.

pub mod clock;
pub mod config;
pub mod depletion;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod notifier;
pub mod rate_table;
pub mod record;
pub mod scheduler;
pub mod store;
pub mod topup;
pub mod types;
