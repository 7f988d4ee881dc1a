//! Remote ledger — an optional authoritative balance store.
//!
//! When one is configured, top-ups write through to it before anything
//! changes locally, and `reconcile` treats its balance as the truth.
//! The local derived balance is then only a cache.

use crate::{
    error::{TimerError, TimerResult},
    record::TopupEntry,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub trait RemoteLedger: Send {
    /// Record a credit. An error rejects the top-up.
    fn record_topup(&self, entry: &TopupEntry) -> TimerResult<()>;

    /// Authoritative balance for an account, if the ledger has one.
    fn fetch_balance(&self, account_id: &str) -> TimerResult<Option<f64>>;
}

#[derive(Serialize)]
struct AddBalanceRequest<'a> {
    action:     &'static str,
    user_id:    &'a str,
    amount:     f64,
    admin_name: &'a str,
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    balance: Option<f64>,
}

/// JSON-over-HTTP admin action service.
///
/// - `POST {url}` with `{"action": "add_balance", ...}` records a credit.
/// - `GET {url}?user_id=ID` returns the account, `balance` may be null.
pub struct HttpLedger {
    url:    String,
    client: reqwest::blocking::Client,
}

impl HttpLedger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> TimerResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TimerError::RemoteLedger(format!("client: {e}")))?;
        Ok(Self { url: url.into(), client })
    }
}

impl RemoteLedger for HttpLedger {
    fn record_topup(&self, entry: &TopupEntry) -> TimerResult<()> {
        let body = AddBalanceRequest {
            action:     "add_balance",
            user_id:    &entry.account_id,
            amount:     entry.amount,
            admin_name: &entry.initiated_by,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| TimerError::RemoteLedger(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TimerError::RemoteLedger(format!(
                "add_balance for {} answered {}",
                entry.account_id,
                response.status()
            )));
        }
        Ok(())
    }

    fn fetch_balance(&self, account_id: &str) -> TimerResult<Option<f64>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("user_id", account_id)])
            .send()
            .map_err(|e| TimerError::RemoteLedger(e.to_string()))?;
        match response.status().as_u16() {
            404 => Ok(None),
            s if (200..300).contains(&s) => {
                let account: AccountResponse = response
                    .json()
                    .map_err(|e| TimerError::RemoteLedger(e.to_string()))?;
                Ok(account.balance)
            }
            s => Err(TimerError::RemoteLedger(format!(
                "fetch for {account_id} answered {s}"
            ))),
        }
    }
}
