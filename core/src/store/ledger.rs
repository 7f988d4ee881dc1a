//! Store methods for the append-only top-up ledger.

use super::{from_millis, TimerStore};
use crate::{error::TimerResult, record::TopupEntry};
use rusqlite::params;

type RawEntry = (String, String, f64, String, i64);

impl TimerStore {
    pub fn append_topup(&self, entry: &TopupEntry) -> TimerResult<()> {
        self.conn.execute(
            "INSERT INTO topup_ledger (entry_id, account_id, amount, initiated_by, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.account_id,
                entry.amount,
                entry.initiated_by,
                entry.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// One account's top-ups in the order they were applied.
    pub fn topup_history(&self, account_id: &str) -> TimerResult<Vec<TopupEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, account_id, amount, initiated_by, created_at_ms
             FROM topup_ledger WHERE account_id = ?1
             ORDER BY seq ASC",
        )?;
        let raw = stmt
            .query_map(params![account_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<RawEntry>, _>>()?;
        raw.into_iter().map(to_entry).collect()
    }

    /// The newest `limit` top-ups across all accounts, newest first.
    pub fn recent_topups(&self, limit: usize) -> TimerResult<Vec<TopupEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, account_id, amount, initiated_by, created_at_ms
             FROM topup_ledger
             ORDER BY seq DESC LIMIT ?1",
        )?;
        let raw = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<RawEntry>, _>>()?;
        raw.into_iter().map(to_entry).collect()
    }

    pub fn topup_total(&self, account_id: &str) -> TimerResult<f64> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM topup_ledger WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

fn to_entry((id, account_id, amount, initiated_by, created_at_ms): RawEntry) -> TimerResult<TopupEntry> {
    Ok(TopupEntry {
        id,
        account_id,
        amount,
        initiated_by,
        created_at: from_millis(created_at_ms)?,
    })
}
