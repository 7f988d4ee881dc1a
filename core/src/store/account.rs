use super::TimerStore;
use crate::{
    error::TimerResult,
    record::{AccountContact, AccountTimerRecord},
    types::{AccountId, Timestamp},
};
use chrono::DateTime;
use rusqlite::{params, OptionalExtension, Row};

/// An account as listed for the admin overview.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub record:  AccountTimerRecord,
    pub contact: AccountContact,
}

const RECORD_COLUMNS: &str =
    "account_id, coefficient, balance, deadline_ms, notification_sent, last_tick_at_ms, updated_at_ms";

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AccountTimerRecord> {
    Ok(AccountTimerRecord {
        account_id:        row.get(0)?,
        coefficient:       row.get(1)?,
        balance:           row.get(2)?,
        deadline:          opt_ts(row, 3)?,
        notification_sent: row.get::<_, i32>(4)? != 0,
        last_tick_at:      opt_ts(row, 5)?,
        updated_at:        ts(row, 6)?,
    })
}

impl TimerStore {
    // ── Account ───────────────────────────────────────────────────

    /// Create the account with a default record if it does not exist.
    /// Returns true when a row was inserted.
    pub fn ensure_account(
        &self,
        account_id: &str,
        username: &str,
        coefficient: f64,
        now: Timestamp,
    ) -> TimerResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO account
                (account_id, username, coefficient, balance, notification_sent, updated_at_ms, created_at_ms)
             VALUES (?1, ?2, ?3, 0.0, 0, ?4, ?4)",
            params![account_id, username, coefficient, now.timestamp_millis()],
        )?;
        Ok(inserted > 0)
    }

    pub fn get(&self, account_id: &str) -> TimerResult<Option<AccountTimerRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM account WHERE account_id = ?1"),
                params![account_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Write the whole record as one row. Contact columns are untouched.
    pub fn put(&self, record: &AccountTimerRecord) -> TimerResult<()> {
        self.conn.execute(
            "INSERT INTO account
                (account_id, username, coefficient, balance, deadline_ms, notification_sent,
                 last_tick_at_ms, updated_at_ms, created_at_ms)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(account_id) DO UPDATE SET
                coefficient       = excluded.coefficient,
                balance           = excluded.balance,
                deadline_ms       = excluded.deadline_ms,
                notification_sent = excluded.notification_sent,
                last_tick_at_ms   = excluded.last_tick_at_ms,
                updated_at_ms     = excluded.updated_at_ms",
            params![
                record.account_id,
                record.coefficient,
                record.balance,
                record.deadline.map(|d| d.timestamp_millis()),
                record.notification_sent as i32,
                record.last_tick_at.map(|t| t.timestamp_millis()),
                record.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn contact(&self, account_id: &str) -> TimerResult<Option<AccountContact>> {
        let contact = self
            .conn
            .query_row(
                "SELECT username, email, phone FROM account WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(AccountContact {
                        username: row.get(0)?,
                        email:    row.get(1)?,
                        phone:    row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(contact)
    }

    /// Returns false when the account does not exist.
    pub fn set_contact(&self, account_id: &str, contact: &AccountContact) -> TimerResult<bool> {
        let updated = self.conn.execute(
            "UPDATE account SET username = ?1, email = ?2, phone = ?3 WHERE account_id = ?4",
            params![contact.username, contact.email, contact.phone, account_id],
        )?;
        Ok(updated > 0)
    }

    pub fn all_accounts(&self) -> TimerResult<Vec<AccountRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}, username, email, phone FROM account ORDER BY account_id"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(AccountRow {
                record: record_from_row(row)?,
                contact: AccountContact {
                    username: row.get(7)?,
                    email:    row.get(8)?,
                    phone:    row.get(9)?,
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Accounts with a deadline set: the ones a tick pass has to visit.
    pub fn running_account_ids(&self) -> TimerResult<Vec<AccountId>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id FROM account
             WHERE deadline_ms IS NOT NULL AND coefficient > 0
             ORDER BY account_id",
        )?;
        let ids = stmt.query_map([], |row| row.get(0))?;
        ids.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn account_count(&self) -> TimerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM account", [], |row| row.get(0))?;
        Ok(count)
    }
}
