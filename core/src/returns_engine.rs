//! Returns engine — detects return events and serves return analytics.
//!
//! This engine:
//!   1. Sweeps recently returned orders and creates one immutable
//!      `ReturnEvent` per order (the UNIQUE order_id makes re-scans
//!      detect nothing)
//!   2. Recomputes the owning city's rolling metrics from the events
//!   3. Resolves events as a soft no-op when nothing matches
//!   4. Serves the summary / trend / list read paths for dashboards
//!
//! Triggered externally; `run_detection` holds the returns engine lock.

use crate::clock::{day_key, day_start};
use crate::config::OpsConfig;
use crate::error::{OpsError, OpsResult};
use crate::store::{OpsStore, OrderRow};
use crate::types::{CityRef, CustomerId, OrderId};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

const LOCK_NAME: &str = "returns";

// ── Public types ───────────────────────────────────────────────────

/// Row from the `return_event` table. Immutable once created;
/// resolution attaches notes without deleting anything.
#[derive(Debug, Clone, Serialize)]
pub struct ReturnEventRow {
    pub event_id: String,
    pub order_id: OrderId,
    pub customer_phone: CustomerId,
    pub city_ref: CityRef,
    pub amount: f64,
    pub shipping_loss: f64,
    pub detected_at: String,
    pub resolved: bool,
    pub resolved_at: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReturnsRunResult {
    pub scanned: i64,
    pub detected: i64,
    pub updated: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveReceipt {
    pub ok: bool,
    pub order_id: OrderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnsSummary {
    pub today: i64,
    pub last_7d: i64,
    pub last_30d: i64,
    pub return_rate_30d: f64,
    pub shipping_losses_30d: f64,
}

/// Arrays aligned per day, oldest first; empty days are zero.
#[derive(Debug, Clone, Serialize)]
pub struct ReturnsTrend {
    pub labels: Vec<String>,
    pub returns: Vec<i64>,
    pub losses: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnsPage {
    pub items: Vec<ReturnEventRow>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct ReturnsEngine {
    config: OpsConfig,
    store: OpsStore,
}

impl ReturnsEngine {
    pub fn new(config: OpsConfig, store: OpsStore) -> OpsResult<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    /// Sweep up to `limit` recently returned orders; create events for
    /// the ones not yet represented and refresh their cities' metrics.
    pub fn run_detection(&self, now: DateTime<Utc>, limit: i64) -> OpsResult<ReturnsRunResult> {
        let token = self
            .store
            .try_acquire_lock(LOCK_NAME, now, self.config.lock_ttl_minutes)?
            .ok_or(OpsError::EngineBusy { engine: LOCK_NAME })?;
        let result = self.detect(now, limit);
        self.store.release_lock(LOCK_NAME, &token)?;
        result
    }

    fn detect(&self, now: DateTime<Utc>, limit: i64) -> OpsResult<ReturnsRunResult> {
        let mut result = ReturnsRunResult::default();
        let mut touched: BTreeSet<CityRef> = BTreeSet::new();

        for order in self.store.returned_orders(limit)? {
            result.scanned += 1;
            let loss = self.shipping_loss(&order);
            if self.store.insert_return_event(&order, loss, now)? {
                result.detected += 1;
                touched.insert(order.city_ref.clone());
            }
        }
        for city in &touched {
            self.store.refresh_city_metrics(city, now)?;
            result.updated += 1;
        }
        log::info!(
            "return detection: scanned={} detected={} updated={}",
            result.scanned,
            result.detected,
            result.updated
        );
        Ok(result)
    }

    fn shipping_loss(&self, order: &OrderRow) -> f64 {
        if order.shipping_cost > 0.0 {
            order.shipping_cost
        } else {
            self.config.returns.fallback_shipping_cost
        }
    }

    /// Soft no-op when nothing matches: the caller's retry is always
    /// safe. Resolving twice is also a soft success.
    pub fn resolve(
        &self,
        order_id: &str,
        notes: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<ResolveReceipt> {
        if self.store.resolve_return_event(order_id, notes, now)? {
            return Ok(ResolveReceipt {
                ok: true,
                order_id: order_id.to_string(),
                error: None,
            });
        }
        // Already resolved counts as done; missing entirely is the
        // flagged soft failure.
        let ok = self
            .store
            .return_event_for_order(order_id)?
            .map(|e| e.resolved)
            .unwrap_or(false);
        Ok(ResolveReceipt {
            ok,
            order_id: order_id.to_string(),
            error: (!ok).then(|| "not found".to_string()),
        })
    }

    pub fn summary(&self, now: DateTime<Utc>) -> OpsResult<ReturnsSummary> {
        let (today, _) = self.store.returns_since(day_start(now))?;
        let (last_7d, _) = self.store.returns_since(now - Duration::days(7))?;
        let since_30 = now - Duration::days(30);
        let (last_30d, losses_30d) = self.store.returns_since(since_30)?;
        let concluded = self.store.concluded_since(since_30)?;
        Ok(ReturnsSummary {
            today,
            last_7d,
            last_30d,
            return_rate_30d: if concluded > 0 {
                last_30d as f64 / concluded as f64
            } else {
                0.0
            },
            shipping_losses_30d: losses_30d,
        })
    }

    /// Contiguous per-day series for the trailing `days` days, today
    /// included, oldest first.
    pub fn trend(&self, now: DateTime<Utc>, days: i64) -> OpsResult<ReturnsTrend> {
        let days = days.max(1);
        let since = day_start(now) - Duration::days(days - 1);
        let by_day = self.store.returns_by_day(since)?;

        let mut trend = ReturnsTrend {
            labels: Vec::with_capacity(days as usize),
            returns: vec![0; days as usize],
            losses: vec![0.0; days as usize],
        };
        for offset in 0..days {
            trend.labels.push(day_key(since + Duration::days(offset)));
        }
        for (day, count, loss) in by_day {
            if let Some(idx) = trend.labels.iter().position(|l| *l == day) {
                trend.returns[idx] = count;
                trend.losses[idx] = loss;
            }
        }
        Ok(trend)
    }

    pub fn list(&self, skip: i64, limit: i64) -> OpsResult<ReturnsPage> {
        Ok(ReturnsPage {
            items: self.store.return_events_page(skip, limit)?,
            total: self.store.return_event_count()?,
            skip,
            limit,
        })
    }
}
