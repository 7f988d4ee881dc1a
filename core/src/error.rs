use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimerError {
    #[error("Invalid top-up amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid coefficient: {0}")]
    InvalidCoefficient(String),

    #[error("Invalid timer duration: {0}")]
    InvalidDuration(String),

    #[error("Notification dispatch failed for account {account_id}: {reason}")]
    NotificationDispatchFailed { account_id: String, reason: String },

    #[error("Clock skew on account {account_id}: now is {behind_ms} ms behind last tick")]
    ClockSkew { account_id: String, behind_ms: i64 },

    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error("Remote ledger error: {0}")]
    RemoteLedger(String),

    #[error("Top-up {entry_id} reached the remote ledger but not the local store for {account_id}: {reason}; reconcile required")]
    LocalCommitFailed {
        account_id: String,
        entry_id:   String,
        reason:     String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TimerResult<T> = Result<T, TimerError>;
