//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine calls store methods and never executes SQL directly.
//!
//! Timestamps are stored as epoch milliseconds (INTEGER) so deadlines
//! compare and round-trip exactly.

use crate::{
    error::{TimerError, TimerResult},
    event::{EventLogEntry, TimerEvent},
    record::{AccountTimerRecord, TopupEntry},
    types::{AccountId, Timestamp},
};
use chrono::DateTime;
use rusqlite::{params, Connection};

mod account;
mod ledger;

pub use account::AccountRow;

pub struct TimerStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl TimerStore {
    pub fn open(path: &str) -> TimerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // An admin view and a user view may tick the same file.
        conn.busy_timeout(std::time::Duration::from_millis(500))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> TimerResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> TimerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to run repeatedly.
    pub fn migrate(&self) -> TimerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_accounts.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_topup_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_event_log.sql"))?;
        Ok(())
    }

    /// Persist a record together with its ledger entry and events in one
    /// transaction. Either all of it lands or none of it does.
    pub fn commit(
        &self,
        record: &AccountTimerRecord,
        topup: Option<&TopupEntry>,
        events: &[TimerEvent],
        at: Timestamp,
    ) -> TimerResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        self.put(record)?;
        if let Some(entry) = topup {
            self.append_topup(entry)?;
        }
        for event in events {
            self.append_event(event, at)?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &TimerEvent, at: Timestamp) -> TimerResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (account_id, at_ms, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.account_id(),
                at.timestamp_millis(),
                event.type_name(),
                serde_json::to_string(event)?,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_account(&self, account_id: &str) -> TimerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, at_ms, event_type, payload
             FROM event_log WHERE account_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![account_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, AccountId>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, account_id, at_ms, event_type, payload)| {
                Ok(EventLogEntry {
                    id: Some(id),
                    account_id,
                    at: from_millis(at_ms)?,
                    event_type,
                    payload,
                })
            })
            .collect()
    }

    pub fn event_count(&self, account_id: &str, event_type: &str) -> TimerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE account_id = ?1 AND event_type = ?2",
            params![account_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

pub(crate) fn from_millis(ms: i64) -> TimerResult<Timestamp> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| TimerError::Other(anyhow::anyhow!("timestamp out of range: {ms}")))
}
