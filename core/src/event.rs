//! Timer events — the audit trail of every state change.
//!
//! RULE: Every engine operation that mutates a record emits an event,
//! and the engine appends it to the event log before returning.

use crate::types::{AccountId, Timestamp};
use serde::{Deserialize, Serialize};

/// Every event the engine can emit.
/// Variants are only ever appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    // ── Provisioning ───────────────────────────────
    AccountCreated {
        account_id: AccountId,
        coefficient: f64,
    },
    TimerProvisioned {
        account_id: AccountId,
        balance: f64,
        coefficient: f64,
        deadline: Option<Timestamp>,
    },
    CoefficientChanged {
        account_id: AccountId,
        old_value: f64,
        new_value: f64,
        balance: f64,
        deadline: Option<Timestamp>,
    },

    // ── Credits ────────────────────────────────────
    TopupApplied {
        account_id: AccountId,
        entry_id: String,
        amount: f64,
        initiated_by: String,
        balance: f64,
        deadline: Option<Timestamp>,
    },
    BalanceReconciled {
        account_id: AccountId,
        local_balance: f64,
        remote_balance: f64,
    },

    // ── Depletion ──────────────────────────────────
    TimerExpired {
        account_id: AccountId,
    },
    ClockSkewDetected {
        account_id: AccountId,
        behind_ms: i64,
    },

    // ── Threshold ──────────────────────────────────
    LowBalanceCrossed {
        account_id: AccountId,
        balance: f64,
        threshold: f64,
    },
    BalanceRecovered {
        account_id: AccountId,
        balance: f64,
    },
    NotificationDispatchFailed {
        account_id: AccountId,
        reason: String,
    },

    // ── Remote ledger ──────────────────────────────
    /// The remote ledger holds a credit the local store could not commit.
    ReconcileRequired {
        account_id: AccountId,
        entry_id: String,
        amount: f64,
    },
}

impl TimerEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AccountCreated { .. }             => "account_created",
            Self::TimerProvisioned { .. }           => "timer_provisioned",
            Self::CoefficientChanged { .. }         => "coefficient_changed",
            Self::TopupApplied { .. }               => "topup_applied",
            Self::BalanceReconciled { .. }          => "balance_reconciled",
            Self::TimerExpired { .. }               => "timer_expired",
            Self::ClockSkewDetected { .. }          => "clock_skew_detected",
            Self::LowBalanceCrossed { .. }          => "low_balance_crossed",
            Self::BalanceRecovered { .. }           => "balance_recovered",
            Self::NotificationDispatchFailed { .. } => "notification_dispatch_failed",
            Self::ReconcileRequired { .. }          => "reconcile_required",
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            Self::AccountCreated { account_id, .. }
            | Self::TimerProvisioned { account_id, .. }
            | Self::CoefficientChanged { account_id, .. }
            | Self::TopupApplied { account_id, .. }
            | Self::BalanceReconciled { account_id, .. }
            | Self::TimerExpired { account_id }
            | Self::ClockSkewDetected { account_id, .. }
            | Self::LowBalanceCrossed { account_id, .. }
            | Self::BalanceRecovered { account_id, .. }
            | Self::NotificationDispatchFailed { account_id, .. }
            | Self::ReconcileRequired { account_id, .. } => account_id,
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub account_id: AccountId,
    pub at:         Timestamp,
    pub event_type: String,
    pub payload:    String, // JSON-serialized TimerEvent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_matches_serialized_tag() {
        let events = [
            TimerEvent::TimerExpired { account_id: "a".into() },
            TimerEvent::LowBalanceCrossed {
                account_id: "a".into(),
                balance: 990.0,
                threshold: 1000.0,
            },
            TimerEvent::NotificationDispatchFailed {
                account_id: "a".into(),
                reason: "timeout".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.type_name());
            assert_eq!(json["account_id"], "a");
        }
    }
}
