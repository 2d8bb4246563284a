//! Pickup-control engine — non-pickup detection and tiered reminders.
//!
//! This engine:
//!   1. Scans orders awaiting pickup (not muted), oldest arrival first
//!   2. Buckets each by days-at-point into configured day tiers
//!   3. Claims each newly reached tier and dispatches one reminder —
//!      the claim row makes delivery at-most-once per tier
//!   4. Counts distinct customers holding a top-tier order as high risk
//!   5. Serves the read-only KPI and risk-list views over the same scan
//!
//! Per-order failures are counted and never abort the sweep.
//! Triggered externally; `run` holds the pickup engine lock.

use crate::clock::{days_between, parse_ts, ts};
use crate::config::OpsConfig;
use crate::error::{OpsError, OpsResult};
use crate::notify::{Notifier, NotifyStatus};
use crate::store::{OpsStore, OrderRow};
use crate::types::{CustomerId, OrderId, Ttn};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;

const LOCK_NAME: &str = "pickup";
/// SQLite treats a negative LIMIT as unbounded.
const NO_LIMIT: i64 = -1;

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct PickupRunResult {
    pub processed: i64,
    pub sent: i64,
    /// Distinct customers with an order in the top tier. A customer
    /// sitting on several stale parcels still counts once.
    pub high_risk_count: i64,
    pub errors: i64,
}

/// Cumulative count of unmuted waiting orders at or past one boundary.
#[derive(Debug, Clone, Serialize)]
pub struct TierCount {
    pub label: String,
    pub tier_days: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickupKpi {
    pub tiers: Vec<TierCount>,
    pub amount_at_risk: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickupRiskItem {
    pub order_id: OrderId,
    pub ttn: Option<Ttn>,
    pub customer_phone: CustomerId,
    pub city_ref: String,
    pub days_at_point: i64,
    pub tier_label: Option<String>,
    pub amount: f64,
    pub cod: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickupRiskList {
    pub items: Vec<PickupRiskItem>,
    pub count: usize,
    pub filter_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MuteReceipt {
    pub ttn: Ttn,
    pub muted_days: i64,
    pub muted_until: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderReceipt {
    pub ttn: Ttn,
    pub level: String,
    pub status: String,
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct PickupEngine {
    config: OpsConfig,
    store: OpsStore,
    notifier: Box<dyn Notifier>,
}

impl PickupEngine {
    pub fn new(
        config: OpsConfig,
        store: OpsStore,
        notifier: Box<dyn Notifier>,
    ) -> OpsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            notifier,
        })
    }

    /// Highest configured boundary reached by `days`, if any.
    fn tier_for(&self, days: i64) -> Option<i64> {
        self.config
            .pickup
            .tier_days
            .iter()
            .rev()
            .find(|&&boundary| days >= boundary)
            .copied()
    }

    fn top_tier(&self) -> i64 {
        *self.config.pickup.tier_days.last().unwrap_or(&i64::MAX)
    }

    fn reminder_message(&self, ttn: &str, days: i64) -> String {
        self.config
            .pickup
            .reminder_template
            .replace("{ttn}", ttn)
            .replace("{days}", &days.to_string())
    }

    /// Sweep up to `limit` unmuted waiting orders, dispatching one
    /// reminder per newly reached tier.
    pub fn run(&self, now: DateTime<Utc>, limit: i64) -> OpsResult<PickupRunResult> {
        let token = self
            .store
            .try_acquire_lock(LOCK_NAME, now, self.config.lock_ttl_minutes)?
            .ok_or(OpsError::EngineBusy { engine: LOCK_NAME })?;
        let result = self.sweep(now, limit);
        self.store.release_lock(LOCK_NAME, &token)?;
        result
    }

    fn sweep(&self, now: DateTime<Utc>, limit: i64) -> OpsResult<PickupRunResult> {
        let mut result = PickupRunResult::default();
        let mut high_risk_customers: HashSet<CustomerId> = HashSet::new();
        for order in self.store.at_warehouse_unmuted(now, limit)? {
            result.processed += 1;
            match self.process_order(&order, now) {
                Ok((sent, high_risk)) => {
                    if sent {
                        result.sent += 1;
                    }
                    if high_risk {
                        high_risk_customers.insert(order.customer_phone.clone());
                    }
                }
                Err(e) => {
                    log::warn!("pickup sweep: order {} failed: {e}", order.order_id);
                    result.errors += 1;
                }
            }
        }
        result.high_risk_count = high_risk_customers.len() as i64;
        log::info!(
            "pickup run: processed={} sent={} high_risk={} errors={}",
            result.processed,
            result.sent,
            result.high_risk_count,
            result.errors
        );
        Ok(result)
    }

    /// Returns (reminder sent, order at top tier).
    fn process_order(&self, order: &OrderRow, now: DateTime<Utc>) -> OpsResult<(bool, bool)> {
        let days = self.days_at_point(order, now)?;
        let tier = match self.tier_for(days) {
            Some(t) => t,
            None => return Ok((false, false)),
        };
        let high_risk = tier >= self.top_tier();

        // Claim first. If another run already fired this tier, or a
        // previous attempt claimed it and then failed to dispatch, we
        // stay silent — at-most-once, never twice.
        if !self.store.try_claim_reminder(&order.order_id, tier, now)? {
            return Ok((false, high_risk));
        }
        let ttn = order.ttn.as_deref().unwrap_or(&order.order_id);
        let status = self.notifier.send(
            &order.customer_phone,
            &self.reminder_message(ttn, days),
            "pickup_reminder",
            now,
        )?;
        if status == NotifyStatus::Failed {
            return Err(OpsError::DispatchFailure {
                target: order.customer_phone.clone(),
                detail: "gateway refused the message".into(),
            });
        }
        Ok((true, high_risk))
    }

    fn days_at_point(&self, order: &OrderRow, now: DateTime<Utc>) -> OpsResult<i64> {
        let arrived = order.arrived_at.as_deref().ok_or(OpsError::NotFound {
            kind: "arrival timestamp",
            key: order.order_id.clone(),
        })?;
        Ok(days_between(parse_ts(arrived)?, now))
    }

    /// Point-in-time snapshot over the same scan, no notifications.
    pub fn kpi(&self, now: DateTime<Utc>) -> OpsResult<PickupKpi> {
        let boundaries = &self.config.pickup.tier_days;
        let mut tiers: Vec<TierCount> = boundaries
            .iter()
            .map(|&b| TierCount {
                label: format!("{b}+"),
                tier_days: b,
                count: 0,
            })
            .collect();
        let mut amount_at_risk = 0.0;

        for order in self.store.at_warehouse_unmuted(now, NO_LIMIT)? {
            let days = match self.days_at_point(&order, now) {
                Ok(d) => d,
                Err(_) => continue,
            };
            for tier in tiers.iter_mut() {
                if days >= tier.tier_days {
                    tier.count += 1;
                }
            }
            if order.cod && days >= boundaries[0] {
                amount_at_risk += order.amount;
            }
        }
        Ok(PickupKpi {
            tiers,
            amount_at_risk,
        })
    }

    /// Unmuted waiting orders at or past `days`, longest-waiting first.
    pub fn risk_list(
        &self,
        now: DateTime<Utc>,
        days: i64,
        limit: usize,
    ) -> OpsResult<PickupRiskList> {
        let mut items: Vec<PickupRiskItem> = Vec::new();
        for order in self.store.at_warehouse_unmuted(now, NO_LIMIT)? {
            let at_point = match self.days_at_point(&order, now) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if at_point < days {
                continue;
            }
            items.push(PickupRiskItem {
                order_id: order.order_id,
                ttn: order.ttn,
                customer_phone: order.customer_phone,
                city_ref: order.city_ref,
                days_at_point: at_point,
                tier_label: self.tier_for(at_point).map(|t| format!("{t}+")),
                amount: order.amount,
                cod: order.cod,
            });
        }
        items.sort_by(|a, b| b.days_at_point.cmp(&a.days_at_point));
        items.truncate(limit);
        Ok(PickupRiskList {
            count: items.len(),
            items,
            filter_days: days,
        })
    }

    /// Exclude the order from every automated sweep until the window
    /// elapses. `days <= 0` falls back to the configured default.
    pub fn mute(&self, ttn: &str, days: i64, now: DateTime<Utc>) -> OpsResult<MuteReceipt> {
        let order = self
            .store
            .get_order_by_ttn(ttn)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "ttn",
                key: ttn.to_string(),
            })?;
        let days = if days > 0 {
            days
        } else {
            self.config.pickup.default_mute_days
        };
        let until = now + Duration::days(days);
        self.store.set_order_mute(&order.order_id, until)?;
        log::info!("muted ttn {ttn} for {days} days");
        Ok(MuteReceipt {
            ttn: ttn.to_string(),
            muted_days: days,
            muted_until: ts(until),
        })
    }

    /// Operator-triggered single reminder, bypassing the notified guard.
    /// `level` is a configured boundary's name, e.g. "D5".
    pub fn send_reminder(
        &self,
        ttn: &str,
        level: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<ReminderReceipt> {
        let tier = self.parse_level(level)?;
        let order = self
            .store
            .get_order_by_ttn(ttn)?
            .filter(|o| o.status == crate::status::OrderStatus::AtWarehouse)
            .ok_or_else(|| OpsError::NotFound {
                kind: "order awaiting pickup",
                key: ttn.to_string(),
            })?;
        let days = self.days_at_point(&order, now)?;
        let status = self.notifier.send(
            &order.customer_phone,
            &self.reminder_message(ttn, days.max(tier)),
            "manual_reminder",
            now,
        )?;
        // Mark the tier so the automatic sweep does not repeat it.
        self.store.try_claim_reminder(&order.order_id, tier, now)?;
        Ok(ReminderReceipt {
            ttn: ttn.to_string(),
            level: level.to_string(),
            status: status.as_str().to_string(),
        })
    }

    fn parse_level(&self, level: &str) -> OpsResult<i64> {
        let days = level
            .strip_prefix('D')
            .and_then(|d| d.parse::<i64>().ok())
            .filter(|d| self.config.pickup.tier_days.contains(d));
        days.ok_or_else(|| OpsError::NotFound {
            kind: "reminder level",
            key: level.to_string(),
        })
    }
}
