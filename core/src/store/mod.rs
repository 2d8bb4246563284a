//! SQLite persistence layer.
//!
//! RULE: Only the store modules talk to the database.
//! Engines call store methods — they never execute SQL directly.
//!
//! Orders are the root entity. Status changes go through
//! `transition_order`, which checks the state machine and performs a
//! conditional write, so a stale caller can never clobber a newer status.

use crate::clock::ts;
use crate::error::{OpsError, OpsResult};
use crate::status::OrderStatus;
use crate::types::{CustomerId, OrderId, Ttn};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

mod guard;
mod pickup;
mod policy;
mod returns;
mod risk;

pub struct OpsStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for files and shared URIs
}

/// Parse a TEXT column into a typed value inside a row mapper.
pub(crate) fn parse_text_col<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ── Rows ───────────────────────────────────────────────────────────

/// Input for a new order. Status always starts at `Created`.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub order_id: OrderId,
    pub customer_phone: CustomerId,
    pub ttn: Option<Ttn>,
    pub city_ref: String,
    pub amount: f64,
    pub weight: f64,
    pub cod: bool,
    pub shipping_cost: f64,
}

#[derive(Debug, Clone)]
pub struct OrderRow {
    pub order_id: OrderId,
    pub customer_phone: CustomerId,
    pub ttn: Option<Ttn>,
    pub city_ref: String,
    pub amount: f64,
    pub weight: f64,
    pub cod: bool,
    pub shipping_cost: f64,
    pub status: OrderStatus,
    pub created_at: String,
    pub arrived_at: Option<String>,
    pub status_changed_at: String,
    pub pickup_mute_until: Option<String>,
}

/// Per-customer order tallies feeding the risk feature snapshot.
#[derive(Debug, Clone, Default)]
pub struct CustomerOrderStats {
    pub total: i64,
    pub cancelled: i64,
    pub picked_up: i64,
    pub returned: i64,
}

impl CustomerOrderStats {
    /// Deliveries that reached a hand-off outcome, good or bad.
    pub fn concluded(&self) -> i64 {
        self.picked_up + self.returned
    }
}

const ORDER_COLS: &str = "order_id, customer_phone, ttn, city_ref, amount, weight, cod, \
     shipping_cost, status, created_at, arrived_at, status_changed_at, pickup_mute_until";

fn map_order(r: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        order_id: r.get(0)?,
        customer_phone: r.get(1)?,
        ttn: r.get(2)?,
        city_ref: r.get(3)?,
        amount: r.get(4)?,
        weight: r.get(5)?,
        cod: r.get::<_, i32>(6)? != 0,
        shipping_cost: r.get(7)?,
        status: parse_text_col(8, r.get::<_, String>(8)?)?,
        created_at: r.get(9)?,
        arrived_at: r.get(10)?,
        status_changed_at: r.get(11)?,
        pickup_mute_until: r.get(12)?,
    })
}

impl OpsStore {
    pub fn open(path: &str) -> OpsResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an isolated in-memory database (single-connection tests only).
    pub fn in_memory() -> OpsResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a named shared-memory database so reopened connections see the
    /// same data. It lives while at least one connection stays open, which
    /// the engine façade guarantees by holding the primary handle.
    pub fn in_memory_shared(tag: &str) -> OpsResult<Self> {
        Self::open(&format!("file:{tag}?mode=memory&cache=shared"))
    }

    /// Reopen a new connection to the same database.
    /// For plain in-memory databases this returns an isolated copy.
    pub fn reopen(&self) -> OpsResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> OpsResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_orders.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_risk.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/003_pickup.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/004_returns.sql"))?;
        Ok(())
    }

    // ── Customer ───────────────────────────────────────────────

    pub fn insert_customer(
        &self,
        phone: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO customer (phone, name, created_at) VALUES (?1, ?2, ?3)",
            params![phone, name, ts(now)],
        )?;
        Ok(())
    }

    /// Complaint/chargeback tallies come from the surrounding CRM; this
    /// write exists for intake glue and tests.
    pub fn set_customer_counters(
        &self,
        phone: &str,
        complaints: i64,
        chargebacks: i64,
    ) -> OpsResult<()> {
        self.conn.execute(
            "UPDATE customer SET complaint_count=?1, chargeback_count=?2 WHERE phone=?3",
            params![complaints, chargebacks, phone],
        )?;
        Ok(())
    }

    pub fn customer_exists(&self, phone: &str) -> OpsResult<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM customer WHERE phone=?1",
                params![phone],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn customer_counters(&self, phone: &str) -> OpsResult<(i64, i64)> {
        self.conn
            .query_row(
                "SELECT complaint_count, chargeback_count FROM customer WHERE phone=?1",
                params![phone],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| OpsError::NotFound {
                kind: "customer",
                key: phone.to_string(),
            })
    }

    pub fn customer_count(&self) -> OpsResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM customer", [], |r| r.get(0))?)
    }

    // ── Orders ─────────────────────────────────────────────────

    pub fn insert_order(&self, draft: &OrderDraft, now: DateTime<Utc>) -> OpsResult<()> {
        let stamp = ts(now);
        self.conn.execute(
            "INSERT INTO orders (order_id, customer_phone, ttn, city_ref, amount, weight,
                cod, shipping_cost, status, created_at, status_changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                draft.order_id,
                draft.customer_phone,
                draft.ttn,
                draft.city_ref,
                draft.amount,
                draft.weight,
                if draft.cod { 1 } else { 0 },
                draft.shipping_cost,
                OrderStatus::Created.as_str(),
                stamp,
            ],
        )?;
        Ok(())
    }

    pub fn get_order(&self, order_id: &str) -> OpsResult<Option<OrderRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ORDER_COLS} FROM orders WHERE order_id=?1"),
                params![order_id],
                map_order,
            )
            .optional()?)
    }

    pub fn get_order_by_ttn(&self, ttn: &str) -> OpsResult<Option<OrderRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ORDER_COLS} FROM orders WHERE ttn=?1"),
                params![ttn],
                map_order,
            )
            .optional()?)
    }

    /// The only status mutation path. Checks the state machine, then
    /// writes conditionally on the status still being what we read, and
    /// appends the audit log row.
    pub fn transition_order(
        &self,
        order_id: &str,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> OpsResult<()> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM orders WHERE order_id=?1",
                params![order_id],
                |r| r.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| OpsError::NotFound {
            kind: "order",
            key: order_id.to_string(),
        })?;
        let from: OrderStatus = raw.parse()?;
        from.check_transition(to)?;

        let stamp_col = match to {
            OrderStatus::Created => "created_at",
            OrderStatus::Confirmed => "confirmed_at",
            OrderStatus::Shipped => "shipped_at",
            OrderStatus::AtWarehouse => "arrived_at",
            OrderStatus::PickedUp => "picked_up_at",
            OrderStatus::Returned => "returned_at",
            OrderStatus::Cancelled => "cancelled_at",
        };
        let stamp = ts(at);
        let changed = self.conn.execute(
            &format!(
                "UPDATE orders SET status=?1, status_changed_at=?2, {stamp_col}=?2
                 WHERE order_id=?3 AND status=?4"
            ),
            params![to.as_str(), stamp, order_id, from.as_str()],
        )?;
        if changed == 0 {
            // Status moved under us; the caller sees the same rejection
            // as any stale transition.
            return Err(OpsError::InvalidTransition { from, to });
        }

        self.conn.execute(
            "INSERT INTO order_status_log (order_id, from_status, to_status, changed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![order_id, from.as_str(), to.as_str(), stamp],
        )?;
        Ok(())
    }

    /// Orders awaiting pickup and not muted as of `now`, oldest arrival
    /// first. `limit` of -1 means unbounded (read-only rollups).
    pub fn at_warehouse_unmuted(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> OpsResult<Vec<OrderRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORDER_COLS} FROM orders
             WHERE status = 'at_warehouse'
               AND (pickup_mute_until IS NULL OR pickup_mute_until <= ?1)
             ORDER BY arrived_at ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![ts(now), limit], map_order)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_order_mute(&self, order_id: &str, until: DateTime<Utc>) -> OpsResult<()> {
        self.conn.execute(
            "UPDATE orders SET pickup_mute_until=?1 WHERE order_id=?2",
            params![ts(until), order_id],
        )?;
        Ok(())
    }

    pub fn customer_order_stats(&self, phone: &str) -> OpsResult<CustomerOrderStats> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'cancelled'), 0),
                    COALESCE(SUM(status = 'picked_up'), 0),
                    COALESCE(SUM(status = 'returned'), 0)
             FROM orders WHERE customer_phone = ?1",
            params![phone],
            |r| {
                Ok(CustomerOrderStats {
                    total: r.get(0)?,
                    cancelled: r.get(1)?,
                    picked_up: r.get(2)?,
                    returned: r.get(3)?,
                })
            },
        )?)
    }

    pub fn order_status_counts(&self) -> OpsResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM orders GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Concluded deliveries (picked up or returned) whose conclusion fell
    /// inside the window. Denominator of the global 30-day return rate.
    pub fn concluded_since(&self, since: DateTime<Utc>) -> OpsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM orders
             WHERE status IN ('picked_up', 'returned') AND status_changed_at >= ?1",
            params![ts(since)],
            |r| r.get(0),
        )?)
    }

    pub fn timeline_for_customer(
        &self,
        phone: &str,
        limit: i64,
    ) -> OpsResult<Vec<crate::reporting::TimelineEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.order_id, o.ttn, l.from_status, l.to_status, l.changed_at
             FROM order_status_log l
             JOIN orders o ON o.order_id = l.order_id
             WHERE o.customer_phone = ?1
             ORDER BY l.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![phone, limit], |r| {
            Ok(crate::reporting::TimelineEntry {
                order_id: r.get(0)?,
                ttn: r.get(1)?,
                from_status: r.get(2)?,
                to_status: r.get(3)?,
                changed_at: r.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Notification queue ────────────────────────────────────

    pub fn enqueue_notification(
        &self,
        id: &str,
        target: &str,
        message: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<()> {
        self.conn.execute(
            "INSERT INTO notification (notification_id, target, message, kind, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', ?5)",
            params![id, target, message, kind, ts(now)],
        )?;
        Ok(())
    }

    pub fn queued_notification_count(&self) -> OpsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM notification WHERE status='queued'",
            [],
            |r| r.get(0),
        )?)
    }

    // ── Engine run lock ───────────────────────────────────────

    /// Claim the named engine's run slot. Locks older than the TTL are
    /// presumed orphaned and reclaimed first. Returns the claimant
    /// token on success; release requires it back.
    pub fn try_acquire_lock(
        &self,
        engine: &str,
        now: DateTime<Utc>,
        ttl_minutes: i64,
    ) -> OpsResult<Option<String>> {
        let stale_before = ts(now - Duration::minutes(ttl_minutes));
        self.conn.execute(
            "DELETE FROM engine_lock WHERE engine=?1 AND acquired_at <= ?2",
            params![engine, stale_before],
        )?;
        let token = uuid::Uuid::new_v4().to_string();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO engine_lock (engine, token, acquired_at) VALUES (?1, ?2, ?3)",
            params![engine, token, ts(now)],
        )?;
        Ok((inserted == 1).then_some(token))
    }

    /// Release the slot only if `token` still owns it. A run that
    /// outlived the TTL and lost its claim to a reclaimer is a no-op
    /// here, never a theft of the successor's lock.
    pub fn release_lock(&self, engine: &str, token: &str) -> OpsResult<()> {
        self.conn.execute(
            "DELETE FROM engine_lock WHERE engine=?1 AND token=?2",
            params![engine, token],
        )?;
        Ok(())
    }

    // ── Test helpers ──────────────────────────────────────────

    pub fn order_count(&self) -> OpsResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))?)
    }

    pub fn status_log_count(&self, order_id: &str) -> OpsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM order_status_log WHERE order_id=?1",
            params![order_id],
            |r| r.get(0),
        )?)
    }
}
