//! Guard incident queries.
//!
//! One live (non-resolved) incident per (customer, kind), enforced by a
//! partial unique index; resolved rows stay behind as history.

use super::OpsStore;
use crate::clock::ts;
use crate::error::OpsResult;
use crate::guard::IncidentRow;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

const INCIDENT_COLS: &str = "incident_id, customer_phone, kind, status, detail, \
     opened_at, last_seen_at, muted_until, resolved_at";

fn map_incident(r: &rusqlite::Row<'_>) -> rusqlite::Result<IncidentRow> {
    Ok(IncidentRow {
        incident_id: r.get(0)?,
        customer_phone: r.get(1)?,
        kind: r.get(2)?,
        status: r.get(3)?,
        detail: r.get(4)?,
        opened_at: r.get(5)?,
        last_seen_at: r.get(6)?,
        muted_until: r.get(7)?,
        resolved_at: r.get(8)?,
    })
}

impl OpsStore {
    /// Re-detection refreshes the live incident instead of duplicating
    /// it. Returns the live row either way.
    pub fn open_or_refresh_incident(
        &self,
        phone: &str,
        kind: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<IncidentRow> {
        let stamp = ts(now);
        let refreshed = self.conn.execute(
            "UPDATE incident SET last_seen_at=?1, detail=?2
             WHERE customer_phone=?3 AND kind=?4 AND status != 'resolved'",
            params![stamp, detail, phone, kind],
        )?;
        if refreshed == 0 {
            self.conn.execute(
                "INSERT INTO incident (incident_id, customer_phone, kind, status, detail,
                    opened_at, last_seen_at)
                 VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?5)",
                params![Uuid::new_v4().to_string(), phone, kind, detail, stamp],
            )?;
        }
        self.conn
            .query_row(
                &format!(
                    "SELECT {INCIDENT_COLS} FROM incident
                     WHERE customer_phone=?1 AND kind=?2 AND status != 'resolved'"
                ),
                params![phone, kind],
                map_incident,
            )
            .map_err(Into::into)
    }

    pub fn get_incident(&self, incident_id: &str) -> OpsResult<Option<IncidentRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {INCIDENT_COLS} FROM incident WHERE incident_id=?1"),
                params![incident_id],
                map_incident,
            )
            .optional()?)
    }

    pub fn list_incidents(
        &self,
        status: Option<&str>,
        limit: i64,
    ) -> OpsResult<Vec<IncidentRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INCIDENT_COLS} FROM incident
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY last_seen_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![status, limit], map_incident)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Idempotent: muting a muted incident extends the window; a
    /// resolved incident stays resolved.
    pub fn mute_incident(&self, incident_id: &str, until: DateTime<Utc>) -> OpsResult<bool> {
        let changed = self.conn.execute(
            "UPDATE incident SET status='muted', muted_until=?1
             WHERE incident_id=?2 AND status != 'resolved'",
            params![ts(until), incident_id],
        )?;
        Ok(changed == 1)
    }

    /// Idempotent and terminal: resolving wins over any mute window.
    pub fn resolve_incident(&self, incident_id: &str, now: DateTime<Utc>) -> OpsResult<bool> {
        let changed = self.conn.execute(
            "UPDATE incident SET status='resolved', resolved_at=?1, muted_until=NULL
             WHERE incident_id=?2 AND status != 'resolved'",
            params![ts(now), incident_id],
        )?;
        Ok(changed == 1)
    }

    /// Open incidents plus muted ones whose window has lapsed.
    pub fn open_incident_count(&self, now: DateTime<Utc>) -> OpsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM incident
             WHERE status = 'open'
                OR (status = 'muted' AND muted_until <= ?1)",
            params![ts(now)],
            |r| r.get(0),
        )?)
    }
}
