//! Read-only reporting rollups for dashboards.
//!
//! RULE: Everything here is computed at read time from authoritative
//! per-entity records. There is no separately-mutated running total
//! anywhere that could drift.

use crate::error::OpsResult;
use crate::pickup_engine::{PickupEngine, PickupKpi};
use crate::returns_engine::{ReturnsEngine, ReturnsSummary};
use crate::risk_engine::RiskEngine;
use crate::store::OpsStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub orders_by_status: BTreeMap<String, i64>,
    pub pickup: PickupKpi,
    pub returns: ReturnsSummary,
    pub risk_bands: BTreeMap<String, i64>,
    pub open_incidents: i64,
    pub queued_notifications: i64,
}

/// One row of a customer's status history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub order_id: String,
    pub ttn: Option<String>,
    pub from_status: String,
    pub to_status: String,
    pub changed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub customer_phone: String,
    pub entries: Vec<TimelineEntry>,
}

pub fn dashboard(
    store: &OpsStore,
    risk: &RiskEngine,
    pickup: &PickupEngine,
    returns: &ReturnsEngine,
    now: DateTime<Utc>,
) -> OpsResult<Dashboard> {
    Ok(Dashboard {
        orders_by_status: store.order_status_counts()?.into_iter().collect(),
        pickup: pickup.kpi(now)?,
        returns: returns.summary(now)?,
        risk_bands: risk.distribution(now)?,
        open_incidents: store.open_incident_count(now)?,
        queued_notifications: store.queued_notification_count()?,
    })
}

pub fn timeline(store: &OpsStore, phone: &str, limit: i64) -> OpsResult<Timeline> {
    Ok(Timeline {
        customer_phone: phone.to_string(),
        entries: store.timeline_for_customer(phone, limit)?,
    })
}
