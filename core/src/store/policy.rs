//! City policy state: recomputed rolling metrics, the one-pending-per-
//! city approval queue, and the applied-change audit log.

use super::OpsStore;
use crate::clock::{day_start, ts};
use crate::error::OpsResult;
use crate::policy_engine::{CityPolicyRow, PendingApprovalRow};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

const CITY_COLS: &str = "city_ref, mode, returns_today, returns_7d, returns_30d, \
     completed_30d, return_rate_30d, loss_today, loss_7d, loss_30d, \
     metrics_at, mode_changed_at";

fn map_city(r: &rusqlite::Row<'_>) -> rusqlite::Result<CityPolicyRow> {
    Ok(CityPolicyRow {
        city_ref: r.get(0)?,
        mode: super::parse_text_col(1, r.get::<_, String>(1)?)?,
        returns_today: r.get(2)?,
        returns_7d: r.get(3)?,
        returns_30d: r.get(4)?,
        completed_30d: r.get(5)?,
        return_rate_30d: r.get(6)?,
        loss_today: r.get(7)?,
        loss_7d: r.get(8)?,
        loss_30d: r.get(9)?,
        metrics_at: r.get(10)?,
        mode_changed_at: r.get(11)?,
    })
}

fn map_pending(r: &rusqlite::Row<'_>) -> rusqlite::Result<PendingApprovalRow> {
    Ok(PendingApprovalRow {
        city_ref: r.get(0)?,
        proposed_mode: super::parse_text_col(1, r.get::<_, String>(1)?)?,
        severity: r.get(2)?,
        return_rate_30d: r.get(3)?,
        proposed_at: r.get(4)?,
        updated_at: r.get(5)?,
    })
}

impl OpsStore {
    /// Recompute the city's rolling windows from the authoritative
    /// return events and order outcomes, and store the snapshot. Never
    /// an incremental counter.
    pub fn refresh_city_metrics(&self, city_ref: &str, now: DateTime<Utc>) -> OpsResult<()> {
        let windows = [
            ts(day_start(now)),
            ts(now - Duration::days(7)),
            ts(now - Duration::days(30)),
        ];
        let mut counts = [0i64; 3];
        let mut losses = [0f64; 3];
        for (i, since) in windows.iter().enumerate() {
            let (count, loss) = self.conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(shipping_loss), 0)
                 FROM return_event WHERE city_ref=?1 AND detected_at >= ?2",
                params![city_ref, since],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?)),
            )?;
            counts[i] = count;
            losses[i] = loss;
        }
        let completed_30d: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM orders
             WHERE city_ref=?1 AND status IN ('picked_up', 'returned')
               AND status_changed_at >= ?2",
            params![city_ref, windows[2]],
            |r| r.get(0),
        )?;
        let rate = if completed_30d > 0 {
            counts[2] as f64 / completed_30d as f64
        } else {
            0.0
        };

        self.conn.execute(
            "INSERT INTO city_policy (city_ref, returns_today, returns_7d, returns_30d,
                completed_30d, return_rate_30d, loss_today, loss_7d, loss_30d, metrics_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(city_ref) DO UPDATE SET
                returns_today=?2, returns_7d=?3, returns_30d=?4, completed_30d=?5,
                return_rate_30d=?6, loss_today=?7, loss_7d=?8, loss_30d=?9, metrics_at=?10",
            params![
                city_ref, counts[0], counts[1], counts[2], completed_30d, rate,
                losses[0], losses[1], losses[2], ts(now),
            ],
        )?;
        Ok(())
    }

    pub fn get_city_policy(&self, city_ref: &str) -> OpsResult<Option<CityPolicyRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CITY_COLS} FROM city_policy WHERE city_ref=?1"),
                params![city_ref],
                map_city,
            )
            .optional()?)
    }

    /// Cities with any return activity in the window, plus cities that
    /// already carry policy state (their metrics still need refreshing).
    pub fn cities_with_activity(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> OpsResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT city_ref FROM return_event WHERE detected_at >= ?1
             UNION
             SELECT city_ref FROM city_policy
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![ts(since), limit], |r| r.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn list_cities(&self, limit: i64) -> OpsResult<Vec<CityPolicyRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CITY_COLS} FROM city_policy
             ORDER BY return_rate_30d DESC, city_ref
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], map_city)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_city_mode(&self, city_ref: &str, mode: &str, now: DateTime<Utc>) -> OpsResult<()> {
        self.conn.execute(
            "UPDATE city_policy SET mode=?1, mode_changed_at=?2 WHERE city_ref=?3",
            params![mode, ts(now), city_ref],
        )?;
        Ok(())
    }

    /// Propose a mode for the city. The PRIMARY KEY upsert is the
    /// one-pending-per-city guard: true means a new record was created,
    /// false means an existing proposal absorbed this one.
    pub fn upsert_pending(
        &self,
        city_ref: &str,
        proposed_mode: &str,
        severity: f64,
        rate: f64,
        now: DateTime<Utc>,
    ) -> OpsResult<bool> {
        let stamp = ts(now);
        let existed: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM policy_pending WHERE city_ref=?1",
                params![city_ref],
                |r| r.get(0),
            )
            .optional()?;
        self.conn.execute(
            "INSERT INTO policy_pending
                (city_ref, proposed_mode, severity, return_rate_30d, proposed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(city_ref) DO UPDATE SET
                proposed_mode=?2, severity=?3, return_rate_30d=?4, updated_at=?5",
            params![city_ref, proposed_mode, severity, rate, stamp],
        )?;
        Ok(existed.is_none())
    }

    pub fn get_pending(&self, city_ref: &str) -> OpsResult<Option<PendingApprovalRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT city_ref, proposed_mode, severity, return_rate_30d,
                        proposed_at, updated_at
                 FROM policy_pending WHERE city_ref=?1",
                params![city_ref],
                map_pending,
            )
            .optional()?)
    }

    pub fn delete_pending(&self, city_ref: &str) -> OpsResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM policy_pending WHERE city_ref=?1",
            params![city_ref],
        )?;
        Ok(deleted == 1)
    }

    pub fn list_pending(&self) -> OpsResult<Vec<PendingApprovalRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT city_ref, proposed_mode, severity, return_rate_30d,
                    proposed_at, updated_at
             FROM policy_pending
             ORDER BY severity DESC, city_ref",
        )?;
        let rows = stmt.query_map([], map_pending)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn pending_count(&self, city_ref: &str) -> OpsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM policy_pending WHERE city_ref=?1",
            params![city_ref],
            |r| r.get(0),
        )?)
    }

    pub fn insert_policy_log(
        &self,
        city_ref: &str,
        from_mode: &str,
        to_mode: &str,
        reason: &str,
        auto: bool,
        now: DateTime<Utc>,
    ) -> OpsResult<()> {
        self.conn.execute(
            "INSERT INTO policy_log (city_ref, from_mode, to_mode, reason, auto, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![city_ref, from_mode, to_mode, reason, auto as i32, ts(now)],
        )?;
        Ok(())
    }

    pub fn policy_log_count(&self, city_ref: &str) -> OpsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM policy_log WHERE city_ref=?1",
            params![city_ref],
            |r| r.get(0),
        )?)
    }
}
