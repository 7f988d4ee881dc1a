//! Notification dispatch — the outbound edge of the threshold notifier.
//!
//! RULE: A dispatch can be slow or fail; the tick loop must not care.
//! Anything that talks to the network is wrapped in a
//! `BackgroundDispatcher`, which hands notices to a worker thread and
//! returns immediately. Failures are logged there and never retried.

use crate::{
    error::{TimerError, TimerResult},
    record::AccountContact,
    types::AccountId,
};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification endpoint answered {status}")]
    Rejected { status: u16 },

    #[error("Dispatch queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

/// Everything a dispatcher needs to tell someone their balance is low.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LowBalanceNotice {
    pub account_id: AccountId,
    pub balance:    f64,
    pub threshold:  f64,
    pub contact:    AccountContact,
}

pub trait NotificationDispatch: Send + Sync {
    fn send(&self, notice: &LowBalanceNotice) -> Result<(), DispatchError>;
}

/// Default dispatcher: records the warning in the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

impl NotificationDispatch for LogDispatcher {
    fn send(&self, notice: &LowBalanceNotice) -> Result<(), DispatchError> {
        log::info!(
            "low balance on account {} ({}): {:.2} < {:.0}",
            notice.account_id,
            notice.contact.username,
            notice.balance,
            notice.threshold,
        );
        Ok(())
    }
}

// ── Webhook ─────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    user_id:  &'a str,
    username: &'a str,
    balance:  f64,
    email:    Option<&'a str>,
    phone:    Option<&'a str>,
}

impl<'a> From<&'a LowBalanceNotice> for WebhookBody<'a> {
    fn from(notice: &'a LowBalanceNotice) -> Self {
        Self {
            user_id:  &notice.account_id,
            username: &notice.contact.username,
            balance:  notice.balance,
            email:    notice.contact.email.as_deref(),
            phone:    notice.contact.phone.as_deref(),
        }
    }
}

/// POSTs the notice as JSON to a notification service that fans it out
/// to email and SMS. Blocking; always run it behind a
/// `BackgroundDispatcher`.
pub struct WebhookDispatcher {
    url:    String,
    client: reqwest::blocking::Client,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> TimerResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TimerError::Other(anyhow::anyhow!("webhook client: {e}")))?;
        Ok(Self { url: url.into(), client })
    }
}

impl NotificationDispatch for WebhookDispatcher {
    fn send(&self, notice: &LowBalanceNotice) -> Result<(), DispatchError> {
        let response = self.client.post(&self.url).json(&WebhookBody::from(notice)).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected { status: status.as_u16() });
        }
        log::debug!("webhook accepted low-balance notice for {}", notice.account_id);
        Ok(())
    }
}

// ── Fire-and-forget wrapper ─────────────────────────────────────────

/// Runs an inner dispatcher on its own worker thread. `send` only
/// enqueues, so it returns in constant time regardless of the network.
pub struct BackgroundDispatcher {
    tx:     Option<mpsc::Sender<LowBalanceNotice>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl BackgroundDispatcher {
    pub fn spawn<D>(inner: D) -> TimerResult<Self>
    where
        D: NotificationDispatch + 'static,
    {
        let (tx, rx) = mpsc::channel::<LowBalanceNotice>();
        let worker = thread::Builder::new()
            .name("notify-dispatch".into())
            .spawn(move || {
                for notice in rx {
                    if let Err(e) = inner.send(&notice) {
                        log::warn!(
                            "low-balance notice for {} not delivered: {e}",
                            notice.account_id
                        );
                    }
                }
            })
            .map_err(|e| TimerError::Other(anyhow::anyhow!("dispatch worker: {e}")))?;
        Ok(Self { tx: Some(tx), worker: Some(worker) })
    }

    /// Close the queue and wait for every pending notice to be handled.
    pub fn shutdown(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("dispatch worker panicked");
            }
        }
    }
}

impl NotificationDispatch for BackgroundDispatcher {
    fn send(&self, notice: &LowBalanceNotice) -> Result<(), DispatchError> {
        self.tx
            .as_ref()
            .ok_or(DispatchError::QueueClosed)?
            .send(notice.clone())
            .map_err(|_| DispatchError::QueueClosed)
    }
}

impl Drop for BackgroundDispatcher {
    fn drop(&mut self) {
        // Detach: the worker drains what is queued and exits on its own.
        self.tx.take();
    }
}
