//! Return event queries and per-day aggregations.

use super::{OpsStore, OrderRow, ORDER_COLS};
use crate::clock::ts;
use crate::error::OpsResult;
use crate::returns_engine::ReturnEventRow;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

const EVENT_COLS: &str = "event_id, order_id, customer_phone, city_ref, amount, \
     shipping_loss, detected_at, resolved, resolved_at, notes";

fn map_event(r: &rusqlite::Row<'_>) -> rusqlite::Result<ReturnEventRow> {
    Ok(ReturnEventRow {
        event_id: r.get(0)?,
        order_id: r.get(1)?,
        customer_phone: r.get(2)?,
        city_ref: r.get(3)?,
        amount: r.get(4)?,
        shipping_loss: r.get(5)?,
        detected_at: r.get(6)?,
        resolved: r.get::<_, i32>(7)? != 0,
        resolved_at: r.get(8)?,
        notes: r.get(9)?,
    })
}

impl OpsStore {
    /// Returned orders, most recently changed first. The detection sweep
    /// source set.
    pub fn returned_orders(&self, limit: i64) -> OpsResult<Vec<OrderRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORDER_COLS} FROM orders
             WHERE status = 'returned'
             ORDER BY status_changed_at DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], super::map_order)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Create the event for a returned order. The UNIQUE order_id makes
    /// this the idempotence guard: false means the order was already
    /// represented and nothing was written.
    pub fn insert_return_event(
        &self,
        order: &OrderRow,
        shipping_loss: f64,
        now: DateTime<Utc>,
    ) -> OpsResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO return_event
                (event_id, order_id, customer_phone, city_ref, amount, shipping_loss, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                order.order_id,
                order.customer_phone,
                order.city_ref,
                order.amount,
                shipping_loss,
                ts(now),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Attach notes and the resolved flag. False when no event matches
    /// the order — the caller turns that into a soft no-op.
    pub fn resolve_return_event(
        &self,
        order_id: &str,
        notes: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<bool> {
        let changed = self.conn.execute(
            "UPDATE return_event SET resolved=1, resolved_at=?1, notes=?2
             WHERE order_id=?3 AND resolved=0",
            params![ts(now), notes, order_id],
        )?;
        Ok(changed == 1)
    }

    pub fn return_event_for_order(&self, order_id: &str) -> OpsResult<Option<ReturnEventRow>> {
        use rusqlite::OptionalExtension;
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLS} FROM return_event WHERE order_id=?1"),
                params![order_id],
                map_event,
            )
            .optional()?)
    }

    /// (count, summed shipping loss) of events detected at or after `since`.
    pub fn returns_since(&self, since: DateTime<Utc>) -> OpsResult<(i64, f64)> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(shipping_loss), 0)
             FROM return_event WHERE detected_at >= ?1",
            params![ts(since)],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
    }

    /// Per-day (count, loss) rows inside the window, keyed by
    /// "YYYY-MM-DD". Days with no returns have no row.
    pub fn returns_by_day(&self, since: DateTime<Utc>) -> OpsResult<Vec<(String, i64, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(detected_at, 1, 10) AS day, COUNT(*), COALESCE(SUM(shipping_loss), 0)
             FROM return_event
             WHERE detected_at >= ?1
             GROUP BY day
             ORDER BY day",
        )?;
        let rows = stmt.query_map(params![ts(since)], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn return_events_page(&self, skip: i64, limit: i64) -> OpsResult<Vec<ReturnEventRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM return_event
             ORDER BY detected_at DESC, event_id
             LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit, skip], map_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn return_event_count(&self) -> OpsResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM return_event", [], |r| r.get(0))?)
    }

    /// Customers with return activity inside the window — the policy
    /// run's risk-refresh sweep.
    pub fn customers_with_returns_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> OpsResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT customer_phone FROM return_event
             WHERE detected_at >= ?1
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![ts(since), limit], |r| r.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
