//! Pickup reminder claims.
//!
//! The (order, tier) primary key is the at-most-once guard: whichever
//! connection wins the conditional insert is the only one that sends.

use super::OpsStore;
use crate::clock::ts;
use crate::error::OpsResult;
use chrono::{DateTime, Utc};
use rusqlite::params;

impl OpsStore {
    /// Claim the (order, tier) reminder slot. True only for the winner;
    /// a repeat claim for a tier already fired is false.
    pub fn try_claim_reminder(
        &self,
        order_id: &str,
        tier_days: i64,
        now: DateTime<Utc>,
    ) -> OpsResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO pickup_reminder (order_id, tier_days, sent_at)
             VALUES (?1, ?2, ?3)",
            params![order_id, tier_days, ts(now)],
        )?;
        Ok(inserted == 1)
    }

    /// Tiers already notified for this order, ascending.
    pub fn notified_tiers(&self, order_id: &str) -> OpsResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT tier_days FROM pickup_reminder WHERE order_id=?1 ORDER BY tier_days",
        )?;
        let rows = stmt.query_map(params![order_id], |r| r.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn reminder_count(&self, order_id: &str) -> OpsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM pickup_reminder WHERE order_id=?1",
            params![order_id],
            |r| r.get(0),
        )?)
    }
}
