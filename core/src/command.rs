//! Operator actions — the transport-agnostic command surface.
//!
//! Authorization is external; every action returns a structured result
//! object serialized to JSON, never a bare success code. `ops-runner`
//! drives this from flags or from JSON lines on stdin.

use crate::engine::OpsEngine;
use crate::error::OpsResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

fn default_limit() -> i64 {
    100
}

/// All operator-issued actions. Variants are added, never reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorAction {
    // ── Risk ──────────────────────────────────────
    RecalcRisk {
        customer: String,
    },
    SetOverride {
        customer: String,
        score: i64,
        until_days: i64,
        by: String,
    },
    ClearOverride {
        customer: String,
    },
    RiskDistribution,
    RiskSummary,

    // ── Pickup control ────────────────────────────
    RunPickup {
        #[serde(default = "default_limit")]
        limit: i64,
    },
    PickupKpi,
    PickupRiskList {
        days: i64,
        #[serde(default = "default_limit")]
        limit: i64,
    },
    Mute {
        ttn: String,
        #[serde(default)]
        days: i64,
    },
    SendReminder {
        ttn: String,
        level: String,
    },

    // ── Returns & policy ──────────────────────────
    RunDetection {
        #[serde(default = "default_limit")]
        limit: i64,
    },
    ResolveReturn {
        order_id: String,
        #[serde(default)]
        notes: String,
    },
    ReturnsSummary,
    ReturnsTrend {
        days: i64,
    },
    ReturnsList {
        #[serde(default)]
        skip: i64,
        #[serde(default = "default_limit")]
        limit: i64,
    },
    RunPolicy {
        #[serde(default = "default_limit")]
        limit: i64,
    },
    ApprovePolicy {
        city_ref: String,
    },
    PolicyPending,
    PolicyCities {
        #[serde(default = "default_limit")]
        limit: i64,
    },

    // ── Guard ─────────────────────────────────────
    Incidents {
        status: Option<String>,
        #[serde(default = "default_limit")]
        limit: i64,
    },
    MuteIncident {
        incident_id: String,
        days: i64,
    },
    ResolveIncident {
        incident_id: String,
    },

    // ── Reporting ─────────────────────────────────
    Dashboard,
    Timeline {
        customer: String,
        #[serde(default = "default_limit")]
        limit: i64,
    },
}

/// Execute one action and serialize its typed result.
pub fn dispatch(
    engine: &OpsEngine,
    action: OperatorAction,
    now: DateTime<Utc>,
) -> OpsResult<serde_json::Value> {
    use OperatorAction::*;
    let value = match action {
        RecalcRisk { customer } => serde_json::to_value(engine.risk.recalculate(&customer, now)?)?,
        SetOverride {
            customer,
            score,
            until_days,
            by,
        } => serde_json::to_value(engine.risk.apply_override(
            &customer,
            score,
            now + Duration::days(until_days),
            &by,
            now,
        )?)?,
        ClearOverride { customer } => serde_json::to_value(engine.risk.clear_override(&customer)?)?,
        RiskDistribution => serde_json::to_value(engine.risk.distribution(now)?)?,
        RiskSummary => serde_json::to_value(engine.risk.summary(now)?)?,

        RunPickup { limit } => serde_json::to_value(engine.pickup.run(now, limit)?)?,
        PickupKpi => serde_json::to_value(engine.pickup.kpi(now)?)?,
        PickupRiskList { days, limit } => {
            serde_json::to_value(engine.pickup.risk_list(now, days, limit as usize)?)?
        }
        Mute { ttn, days } => serde_json::to_value(engine.pickup.mute(&ttn, days, now)?)?,
        SendReminder { ttn, level } => {
            serde_json::to_value(engine.pickup.send_reminder(&ttn, &level, now)?)?
        }

        RunDetection { limit } => serde_json::to_value(engine.returns.run_detection(now, limit)?)?,
        ResolveReturn { order_id, notes } => {
            serde_json::to_value(engine.returns.resolve(&order_id, &notes, now)?)?
        }
        ReturnsSummary => serde_json::to_value(engine.returns.summary(now)?)?,
        ReturnsTrend { days } => serde_json::to_value(engine.returns.trend(now, days)?)?,
        ReturnsList { skip, limit } => serde_json::to_value(engine.returns.list(skip, limit)?)?,
        RunPolicy { limit } => serde_json::to_value(engine.policy.run_policy(now, limit)?)?,
        ApprovePolicy { city_ref } => {
            serde_json::to_value(engine.policy.approve_pending(&city_ref, now)?)?
        }
        PolicyPending => serde_json::to_value(engine.policy.pending()?)?,
        PolicyCities { limit } => serde_json::to_value(engine.policy.cities(limit)?)?,

        Incidents { status, limit } => {
            serde_json::to_value(engine.guard.list(status.as_deref(), limit)?)?
        }
        MuteIncident { incident_id, days } => {
            serde_json::to_value(engine.guard.mute(&incident_id, days, now)?)?
        }
        ResolveIncident { incident_id } => {
            serde_json::to_value(engine.guard.resolve(&incident_id, now)?)?
        }

        Dashboard => serde_json::to_value(engine.dashboard(now)?)?,
        Timeline { customer, limit } => serde_json::to_value(engine.timeline(&customer, limit)?)?,
    };
    Ok(value)
}
