//! The timer engine — the one place records are loaded, changed and saved.
//!
//! OPERATION SHAPE (every mutating call, never reordered):
//!   1. Validate input. Reject before anything is read or written.
//!   2. Load the record (or a default one on first admin interaction).
//!   3. Settle it at `now`: recompute from the deadline and let the
//!      notifier see any crossing since the last write.
//!   4. Compute the next record with the pure functions in depletion.rs,
//!      topup.rs and rate_table.rs, then let the notifier observe it.
//!   5. Write through to the remote ledger, if any. Reject on failure.
//!   6. Commit record, ledger entry and events in one transaction.
//!   7. Only then talk to the notification dispatcher.
//!
//! RULES:
//!   - The clock is read once per operation; all arithmetic uses that instant.
//!   - A failed dispatch is logged and recorded, never propagated.
//!   - After a successful write-through only the commit can fail; that is
//!     reported as `LocalCommitFailed` and needs a reconcile.
//!   - tick_all() survives per-account failures and keeps going.

use crate::{
    clock::{Clock, ManualClock},
    config::TimerConfig,
    depletion,
    dispatch::{BackgroundDispatcher, LogDispatcher, LowBalanceNotice, NotificationDispatch, WebhookDispatcher},
    error::{TimerError, TimerResult},
    event::{EventLogEntry, TimerEvent},
    ledger::{HttpLedger, RemoteLedger},
    notifier::{ThresholdNotifier, ThresholdState, ThresholdTransition},
    rate_table,
    record::{AccountContact, AccountTimerRecord, Countdown, TopupEntry},
    store::{AccountRow, TimerStore},
    topup,
    types::{AccountId, Timestamp},
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// What one tick did to one account.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub account_id: AccountId,
    pub balance:    f64,
    pub deadline:   Option<Timestamp>,
    pub countdown:  Countdown,
    pub expired:    bool,
    pub transition: ThresholdTransition,
    pub skew_ms:    Option<i64>,
}

/// Totals for one pass over every running account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub ticked:   usize,
    pub expired:  usize,
    pub notified: usize,
    pub failed:   usize,
}

/// Which accounts a tick pass covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickScope {
    All,
    Account(AccountId),
}

/// A record brought up to `now` and what the recomputation observed.
struct Settled {
    record:     AccountTimerRecord,
    /// Instant the record was settled at; later than `now` under skew.
    at:         Timestamp,
    expired:    bool,
    skew_ms:    Option<i64>,
    transition: ThresholdTransition,
}

pub struct TimerEngine {
    store:      TimerStore,
    clock:      Arc<dyn Clock>,
    notifier:   ThresholdNotifier,
    dispatcher: Arc<dyn NotificationDispatch>,
    ledger:     Option<Box<dyn RemoteLedger>>,
    config:     TimerConfig,
    ticks_run:  u64,
}

impl TimerEngine {
    /// Bare engine: logging dispatcher, no remote ledger.
    pub fn new(store: TimerStore, clock: Arc<dyn Clock>, config: TimerConfig) -> Self {
        Self {
            notifier: ThresholdNotifier::new(config.low_balance_threshold),
            dispatcher: Arc::new(LogDispatcher),
            ledger: None,
            store,
            clock,
            config,
            ticks_run: 0,
        }
    }

    /// Build a fully wired engine from config.
    /// Call this instead of new() + manual with_*() calls.
    pub fn build(store: TimerStore, clock: Arc<dyn Clock>, config: TimerConfig) -> TimerResult<Self> {
        let webhook = config.notification.webhook_url.clone();
        let ledger_url = config.ledger.url.clone();
        let notify_timeout = Duration::from_secs(config.notification.timeout_secs);
        let ledger_timeout = Duration::from_secs(config.ledger.timeout_secs);

        let mut engine = Self::new(store, clock, config);

        if let Some(url) = webhook {
            let webhook = WebhookDispatcher::new(&url, notify_timeout)?;
            engine = engine.with_dispatcher(Arc::new(BackgroundDispatcher::spawn(webhook)?));
            log::info!("low-balance notices go to {url}");
        }
        if let Some(url) = ledger_url {
            engine = engine.with_ledger(Box::new(HttpLedger::new(&url, ledger_timeout)?));
            log::info!("top-ups write through to {url}");
        }
        Ok(engine)
    }

    /// In-memory engine on a manual clock, for tests and simulation.
    /// The clock starts at 2026-01-01T00:00:00Z.
    pub fn build_test() -> TimerResult<(Self, ManualClock)> {
        let store = TimerStore::in_memory()?;
        store.migrate()?;
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| TimerError::Other(anyhow::anyhow!("invalid test epoch")))?;
        let clock = ManualClock::new(start);
        let engine = Self::new(store, Arc::new(clock.clone()), TimerConfig::default_test());
        Ok((engine, clock))
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatch>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_ledger(mut self, ledger: Box<dyn RemoteLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn store(&self) -> &TimerStore {
        &self.store
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn ticks_run(&self) -> u64 {
        self.ticks_run
    }

    // ── Accounts ─────────────────────────────────────────────────────

    /// Create the account if needed and return its record.
    pub fn ensure_account(&self, account_id: &str, username: &str) -> TimerResult<AccountTimerRecord> {
        let now = self.clock.now();
        if self
            .store
            .ensure_account(account_id, username, self.config.default_coefficient, now)?
        {
            self.store.append_event(
                &TimerEvent::AccountCreated {
                    account_id: account_id.to_string(),
                    coefficient: self.config.default_coefficient,
                },
                now,
            )?;
            log::info!("account {account_id} created for {username}");
        }
        self.record(account_id)
    }

    pub fn set_contact(
        &self,
        account_id: &str,
        email: Option<String>,
        phone: Option<String>,
    ) -> TimerResult<AccountContact> {
        let mut contact = self
            .store
            .contact(account_id)?
            .ok_or_else(|| TimerError::AccountNotFound(account_id.to_string()))?;
        contact.email = email.filter(|e| !e.trim().is_empty());
        contact.phone = phone.filter(|p| !p.trim().is_empty());
        self.store.set_contact(account_id, &contact)?;
        Ok(contact)
    }

    pub fn record(&self, account_id: &str) -> TimerResult<AccountTimerRecord> {
        self.store
            .get(account_id)?
            .ok_or_else(|| TimerError::AccountNotFound(account_id.to_string()))
    }

    /// Existing record, or a fresh default one that the caller's commit
    /// will persist. The creation event is pushed onto `events`.
    fn load_or_default(
        &self,
        account_id: &str,
        now: Timestamp,
        events: &mut Vec<TimerEvent>,
    ) -> TimerResult<AccountTimerRecord> {
        if let Some(record) = self.store.get(account_id)? {
            return Ok(record);
        }
        events.push(TimerEvent::AccountCreated {
            account_id: account_id.to_string(),
            coefficient: self.config.default_coefficient,
        });
        Ok(AccountTimerRecord::new(account_id, self.config.default_coefficient, now))
    }

    // ── Depletion ────────────────────────────────────────────────────

    /// Recompute one account from its deadline and persist the result.
    pub fn tick_account(&mut self, account_id: &str) -> TimerResult<TickReport> {
        let now = self.clock.now();
        let record = self.record(account_id)?;
        let mut events = Vec::new();
        let settled = self.settle(&record, now, &mut events);

        // Flag is committed before dispatch: a failed send must not re-fire.
        self.store.commit(&settled.record, None, &events, now)?;
        self.dispatch_if_crossed(&settled, now);

        self.ticks_run += 1;
        log::debug!("tick {account_id}: balance={:.4}", settled.record.balance);

        Ok(TickReport {
            account_id: account_id.to_string(),
            balance: settled.record.balance,
            deadline: settled.record.deadline,
            countdown: depletion::countdown(&settled.record, settled.at),
            expired: settled.expired,
            transition: settled.transition,
            skew_ms: settled.skew_ms,
        })
    }

    /// Tick every running account. One failing account is logged and
    /// skipped; the pass always completes.
    pub fn tick_all(&mut self) -> TimerResult<TickSummary> {
        let mut summary = TickSummary::default();
        for account_id in self.store.running_account_ids()? {
            match self.tick_account(&account_id) {
                Ok(report) => {
                    summary.ticked += 1;
                    if report.expired {
                        summary.expired += 1;
                    }
                    if report.transition == ThresholdTransition::Crossed {
                        summary.notified += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    log::error!("tick failed for {account_id}: {e}");
                }
            }
        }
        Ok(summary)
    }

    pub fn tick_scope(&mut self, scope: &TickScope) -> TimerResult<TickSummary> {
        match scope {
            TickScope::All => self.tick_all(),
            TickScope::Account(account_id) => {
                let report = self.tick_account(account_id)?;
                Ok(TickSummary {
                    ticked: 1,
                    expired: report.expired as usize,
                    notified: (report.transition == ThresholdTransition::Crossed) as usize,
                    failed: 0,
                })
            }
        }
    }

    /// Bring a loaded record up to `now` and observe the threshold
    /// against the balance persisted before it. Ticks and every mutation
    /// start here, so a crossing that happened between two writes is
    /// seen by whichever call comes first.
    fn settle(
        &self,
        record: &AccountTimerRecord,
        now: Timestamp,
        events: &mut Vec<TimerEvent>,
    ) -> Settled {
        let account_id = &record.account_id;
        let outcome = depletion::tick(record, now);
        let mut next = outcome.record;
        next.updated_at = now;

        if let Some(behind_ms) = outcome.skew_ms {
            log::warn!(
                "{}",
                TimerError::ClockSkew { account_id: account_id.clone(), behind_ms }
            );
            events.push(TimerEvent::ClockSkewDetected {
                account_id: account_id.clone(),
                behind_ms,
            });
        }
        if outcome.expired {
            log::info!("timer for {account_id} expired");
            events.push(TimerEvent::TimerExpired { account_id: account_id.clone() });
        }

        let transition = self.notifier.observe_tick(outcome.previous_balance, &mut next);
        self.push_transition(transition, &next, events);

        Settled {
            at: next.last_tick_at.unwrap_or(now),
            record: next,
            expired: outcome.expired,
            skew_ms: outcome.skew_ms,
            transition,
        }
    }

    fn push_transition(
        &self,
        transition: ThresholdTransition,
        record: &AccountTimerRecord,
        events: &mut Vec<TimerEvent>,
    ) {
        match transition {
            ThresholdTransition::Crossed => events.push(TimerEvent::LowBalanceCrossed {
                account_id: record.account_id.clone(),
                balance: record.balance,
                threshold: self.notifier.threshold(),
            }),
            ThresholdTransition::Recovered => events.push(TimerEvent::BalanceRecovered {
                account_id: record.account_id.clone(),
                balance: record.balance,
            }),
            ThresholdTransition::Unchanged => {}
        }
    }

    fn dispatch_if_crossed(&self, settled: &Settled, now: Timestamp) {
        if settled.transition == ThresholdTransition::Crossed {
            self.dispatch_low_balance(&settled.record, now);
        }
    }

    fn dispatch_low_balance(&self, record: &AccountTimerRecord, now: Timestamp) {
        let contact = match self.store.contact(&record.account_id) {
            Ok(contact) => contact.unwrap_or_default(),
            Err(e) => {
                log::warn!("no contact for {}: {e}", record.account_id);
                AccountContact::default()
            }
        };
        let notice = LowBalanceNotice {
            account_id: record.account_id.clone(),
            balance: record.balance,
            threshold: self.notifier.threshold(),
            contact,
        };
        if let Err(e) = self.dispatcher.send(&notice) {
            let failure = TimerError::NotificationDispatchFailed {
                account_id: record.account_id.clone(),
                reason: e.to_string(),
            };
            log::warn!("{failure}");
            let event = TimerEvent::NotificationDispatchFailed {
                account_id: record.account_id.clone(),
                reason: e.to_string(),
            };
            if let Err(e) = self.store.append_event(&event, now) {
                log::error!("could not record dispatch failure: {e}");
            }
        }
    }

    // ── Credits ──────────────────────────────────────────────────────

    /// Add `amount` to the account and push the deadline out.
    /// On any error before the write-through the stored state is exactly
    /// what it was.
    pub fn apply_topup(
        &mut self,
        account_id: &str,
        amount: f64,
        initiated_by: Option<&str>,
    ) -> TimerResult<AccountTimerRecord> {
        topup::validate_amount(amount)?;

        let now = self.clock.now();
        let mut events = Vec::new();
        let record = self.load_or_default(account_id, now, &mut events)?;
        let settled = self.settle(&record, now, &mut events);

        let mut next = topup::apply_topup(&settled.record, amount, settled.at)?;
        let initiated_by = initiated_by.unwrap_or(self.config.default_initiator.as_str());
        let entry = TopupEntry::new(account_id, amount, initiated_by, now);
        events.push(TimerEvent::TopupApplied {
            account_id: account_id.to_string(),
            entry_id: entry.id.clone(),
            amount,
            initiated_by: entry.initiated_by.clone(),
            balance: next.balance,
            deadline: next.deadline,
        });
        self.observe_credit(&mut next, &mut events);

        // Only the commit may fail once the remote ledger has the credit.
        let written_through = match &self.ledger {
            Some(ledger) => {
                ledger.record_topup(&entry)?;
                true
            }
            None => false,
        };
        if let Err(e) = self.store.commit(&next, Some(&entry), &events, now) {
            if written_through {
                return Err(self.local_commit_failed(&entry, e, now));
            }
            return Err(e);
        }
        self.dispatch_if_crossed(&settled, now);

        log::info!(
            "top-up {amount:.2} on {account_id} by {}: balance {:.2}",
            entry.initiated_by,
            next.balance
        );
        Ok(next)
    }

    /// Text-boundary variant: parses the amount first.
    pub fn apply_topup_str(
        &mut self,
        account_id: &str,
        raw_amount: &str,
        initiated_by: Option<&str>,
    ) -> TimerResult<AccountTimerRecord> {
        let amount = topup::parse_amount(raw_amount)?;
        self.apply_topup(account_id, amount, initiated_by)
    }

    /// The remote ledger holds `entry`, the local store does not.
    /// Leaves a `reconcile_required` event when the store still accepts it.
    fn local_commit_failed(&self, entry: &TopupEntry, cause: TimerError, now: Timestamp) -> TimerError {
        let event = TimerEvent::ReconcileRequired {
            account_id: entry.account_id.clone(),
            entry_id: entry.id.clone(),
            amount: entry.amount,
        };
        if let Err(e) = self.store.append_event(&event, now) {
            log::error!("could not record pending reconcile for {}: {e}", entry.account_id);
        }
        let failure = TimerError::LocalCommitFailed {
            account_id: entry.account_id.clone(),
            entry_id: entry.id.clone(),
            reason: cause.to_string(),
        };
        log::error!("{failure}");
        failure
    }

    /// Replace the local balance with the remote ledger's, when one is
    /// configured and knows the account. Returns the reconciled record.
    pub fn reconcile(&mut self, account_id: &str) -> TimerResult<Option<AccountTimerRecord>> {
        let Some(ledger) = &self.ledger else {
            return Ok(None);
        };
        let Some(remote_balance) = ledger.fetch_balance(account_id)? else {
            return Ok(None);
        };
        if !remote_balance.is_finite() || remote_balance < 0.0 {
            return Err(TimerError::RemoteLedger(format!(
                "ledger returned unusable balance {remote_balance} for {account_id}"
            )));
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        let record = self.load_or_default(account_id, now, &mut events)?;
        let settled = self.settle(&record, now, &mut events);
        let local_balance = settled.record.balance;

        let mut next = settled.record.clone();
        next.balance = remote_balance;
        next.deadline = depletion::project_deadline(remote_balance, next.coefficient, settled.at)
            .map_err(|_| {
                TimerError::RemoteLedger(format!(
                    "ledger balance {remote_balance} for {account_id} is out of range"
                ))
            })?;
        next.updated_at = now;
        events.push(TimerEvent::BalanceReconciled {
            account_id: account_id.to_string(),
            local_balance,
            remote_balance,
        });
        // The ledger may move the balance either way.
        let transition = self.notifier.observe_tick(local_balance, &mut next);
        self.push_transition(transition, &next, &mut events);

        self.store.commit(&next, None, &events, now)?;
        self.dispatch_if_crossed(&settled, now);
        if transition == ThresholdTransition::Crossed {
            self.dispatch_low_balance(&next, now);
        }
        if (local_balance - remote_balance).abs() > 0.01 {
            log::info!(
                "reconciled {account_id}: local {local_balance:.2} -> remote {remote_balance:.2}"
            );
        }
        Ok(Some(next))
    }

    fn observe_credit(&self, record: &mut AccountTimerRecord, events: &mut Vec<TimerEvent>) {
        let transition = self.notifier.observe_credit(record);
        if transition == ThresholdTransition::Recovered {
            self.push_transition(transition, record, events);
        }
    }

    // ── Rate table / provisioning ────────────────────────────────────

    pub fn set_coefficient(&mut self, account_id: &str, value: f64) -> TimerResult<AccountTimerRecord> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let record = self.load_or_default(account_id, now, &mut events)?;
        let settled = self.settle(&record, now, &mut events);
        let next = rate_table::set_coefficient(&settled.record, value, settled.at)?;

        events.push(TimerEvent::CoefficientChanged {
            account_id: account_id.to_string(),
            old_value: record.coefficient,
            new_value: value,
            balance: next.balance,
            deadline: next.deadline,
        });
        self.store.commit(&next, None, &events, now)?;
        self.dispatch_if_crossed(&settled, now);

        if value <= 0.0 {
            log::info!("depletion paused on {account_id} at balance {:.2}", next.balance);
        } else {
            log::info!(
                "coefficient on {account_id}: {} -> {value}, balance {:.2}",
                record.coefficient,
                next.balance
            );
        }
        Ok(next)
    }

    pub fn set_initial_timer(
        &mut self,
        account_id: &str,
        duration_minutes: f64,
        coefficient: f64,
    ) -> TimerResult<AccountTimerRecord> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let record = self.load_or_default(account_id, now, &mut events)?;
        let settled = self.settle(&record, now, &mut events);
        let next = rate_table::set_initial_timer(&settled.record, duration_minutes, coefficient, settled.at)?;
        self.commit_provisioning(next, events, &settled, now)
    }

    pub fn provision_balance(
        &mut self,
        account_id: &str,
        balance: f64,
        coefficient: f64,
    ) -> TimerResult<AccountTimerRecord> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let record = self.load_or_default(account_id, now, &mut events)?;
        let settled = self.settle(&record, now, &mut events);
        let next = rate_table::provision_balance(&settled.record, balance, coefficient, settled.at)?;
        self.commit_provisioning(next, events, &settled, now)
    }

    fn commit_provisioning(
        &self,
        mut next: AccountTimerRecord,
        mut events: Vec<TimerEvent>,
        settled: &Settled,
        now: Timestamp,
    ) -> TimerResult<AccountTimerRecord> {
        events.push(TimerEvent::TimerProvisioned {
            account_id: next.account_id.clone(),
            balance: next.balance,
            coefficient: next.coefficient,
            deadline: next.deadline,
        });
        self.observe_credit(&mut next, &mut events);
        self.store.commit(&next, None, &events, now)?;
        self.dispatch_if_crossed(settled, now);
        log::info!(
            "timer provisioned on {}: {:.2} at {}/min",
            next.account_id,
            next.balance,
            next.coefficient
        );
        Ok(next)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Balance as of now, derived from the deadline. Not persisted.
    pub fn live_balance(&self, account_id: &str) -> TimerResult<f64> {
        let record = self.record(account_id)?;
        Ok(depletion::depleted_balance(&record, self.clock.now()))
    }

    pub fn countdown(&self, account_id: &str) -> TimerResult<Countdown> {
        let record = self.record(account_id)?;
        Ok(depletion::countdown(&record, self.clock.now()))
    }

    pub fn threshold_state(&self, account_id: &str) -> TimerResult<ThresholdState> {
        Ok(self.notifier.state(&self.record(account_id)?))
    }

    pub fn topup_history(&self, account_id: &str) -> TimerResult<Vec<TopupEntry>> {
        self.store.topup_history(account_id)
    }

    pub fn recent_topups(&self, limit: usize) -> TimerResult<Vec<TopupEntry>> {
        self.store.recent_topups(limit)
    }

    pub fn accounts(&self) -> TimerResult<Vec<AccountRow>> {
        self.store.all_accounts()
    }

    pub fn events_for_account(&self, account_id: &str) -> TimerResult<Vec<EventLogEntry>> {
        self.store.events_for_account(account_id)
    }
}
