//! City policy engine — shipping-policy escalation with an approval gate.
//!
//! This engine:
//!   1. Recomputes each active city's rolling return metrics
//!   2. Proposes the next stricter mode when the 30-day return rate
//!      crosses the propose threshold (with minimum order volume)
//!   3. Applies the mode immediately past the force threshold, else
//!      enqueues one pending approval per city (later proposals are
//!      absorbed, never duplicated)
//!   4. Refreshes risk records for customers with recent returns
//!
//! Mode ladder is strict: normal -> restrict_cod -> require_prepay.
//! Triggered externally; `run_policy` holds the policy engine lock.

use crate::config::OpsConfig;
use crate::error::{OpsError, OpsResult};
use crate::risk_engine::RiskEngine;
use crate::store::OpsStore;
use crate::types::CityRef;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const LOCK_NAME: &str = "policy";

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Normal,
    RestrictCod,
    RequirePrepay,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyMode::Normal => "normal",
            PolicyMode::RestrictCod => "restrict_cod",
            PolicyMode::RequirePrepay => "require_prepay",
        }
    }

    /// The escalation ladder. The strictest mode has no successor.
    pub fn next_stricter(&self) -> Option<PolicyMode> {
        match self {
            PolicyMode::Normal => Some(PolicyMode::RestrictCod),
            PolicyMode::RestrictCod => Some(PolicyMode::RequirePrepay),
            PolicyMode::RequirePrepay => None,
        }
    }
}

impl std::str::FromStr for PolicyMode {
    type Err = OpsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "normal" => Ok(PolicyMode::Normal),
            "restrict_cod" => Ok(PolicyMode::RestrictCod),
            "require_prepay" => Ok(PolicyMode::RequirePrepay),
            _ => Err(OpsError::Unrecognized {
                what: "policy mode",
                raw: raw.to_string(),
            }),
        }
    }
}

/// Row from the `city_policy` table — the recomputed metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CityPolicyRow {
    pub city_ref: CityRef,
    pub mode: PolicyMode,
    pub returns_today: i64,
    pub returns_7d: i64,
    pub returns_30d: i64,
    pub completed_30d: i64,
    pub return_rate_30d: f64,
    pub loss_today: f64,
    pub loss_7d: f64,
    pub loss_30d: f64,
    pub metrics_at: Option<String>,
    pub mode_changed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingApprovalRow {
    pub city_ref: CityRef,
    pub proposed_mode: PolicyMode,
    /// How far past the propose threshold the rate sits, in rate points.
    pub severity: f64,
    pub return_rate_30d: f64,
    pub proposed_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicyRunResult {
    pub scanned_customers: i64,
    pub scanned_cities: i64,
    pub proposed: i64,
    pub applied: i64,
    pub approvals_enqueued: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalReceipt {
    pub city_ref: CityRef,
    pub applied_mode: PolicyMode,
    pub approved_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingList {
    pub items: Vec<PendingApprovalRow>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CityList {
    pub items: Vec<CityPolicyRow>,
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct PolicyEngine {
    config: OpsConfig,
    store: OpsStore,
    risk: RiskEngine,
}

impl PolicyEngine {
    pub fn new(config: OpsConfig, store: OpsStore, risk: RiskEngine) -> OpsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            risk,
        })
    }

    pub fn run_policy(&self, now: DateTime<Utc>, limit: i64) -> OpsResult<PolicyRunResult> {
        let token = self
            .store
            .try_acquire_lock(LOCK_NAME, now, self.config.lock_ttl_minutes)?
            .ok_or(OpsError::EngineBusy { engine: LOCK_NAME })?;
        let result = self.sweep(now, limit);
        self.store.release_lock(LOCK_NAME, &token)?;
        result
    }

    fn sweep(&self, now: DateTime<Utc>, limit: i64) -> OpsResult<PolicyRunResult> {
        let mut result = PolicyRunResult::default();
        let since_30 = now - Duration::days(30);

        for city in self.store.cities_with_activity(since_30, limit)? {
            result.scanned_cities += 1;
            match self.evaluate_city(&city, now) {
                Ok(outcome) => {
                    result.proposed += outcome.proposed as i64;
                    result.applied += outcome.applied as i64;
                    result.approvals_enqueued += outcome.enqueued as i64;
                }
                Err(e) => log::warn!("policy sweep: city {city} failed: {e}"),
            }
        }

        // Customers with recent returns get their risk refreshed in the
        // same sweep, so a spiking city surfaces its customers too.
        for phone in self.store.customers_with_returns_since(since_30, limit)? {
            result.scanned_customers += 1;
            if let Err(e) = self.risk.recalculate(&phone, now) {
                log::warn!("policy sweep: risk refresh for {phone} failed: {e}");
            }
        }
        log::info!(
            "policy run: cities={} customers={} proposed={} applied={} enqueued={}",
            result.scanned_cities,
            result.scanned_customers,
            result.proposed,
            result.applied,
            result.approvals_enqueued
        );
        Ok(result)
    }

    fn evaluate_city(&self, city: &str, now: DateTime<Utc>) -> OpsResult<CityOutcome> {
        self.store.refresh_city_metrics(city, now)?;
        let row = self
            .store
            .get_city_policy(city)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "city policy",
                key: city.to_string(),
            })?;
        let pol = &self.config.policy;
        let mut outcome = CityOutcome::default();

        if row.completed_30d < pol.min_orders_30d || row.return_rate_30d < pol.propose_rate {
            return Ok(outcome);
        }
        // A city already at the strictest mode is never re-proposed.
        let target = match row.mode.next_stricter() {
            Some(m) => m,
            None => return Ok(outcome),
        };
        outcome.proposed = true;

        if row.return_rate_30d >= pol.force_rate {
            self.apply_mode(
                city,
                row.mode,
                target,
                &format!("return rate {:.2} over force threshold", row.return_rate_30d),
                true,
                now,
            )?;
            // A force-apply supersedes any queued proposal for the city.
            self.store.delete_pending(city)?;
            outcome.applied = true;
        } else {
            let severity = row.return_rate_30d - pol.propose_rate;
            outcome.enqueued = self.store.upsert_pending(
                city,
                target.as_str(),
                severity,
                row.return_rate_30d,
                now,
            )?;
        }
        Ok(outcome)
    }

    fn apply_mode(
        &self,
        city: &str,
        from: PolicyMode,
        to: PolicyMode,
        reason: &str,
        auto: bool,
        now: DateTime<Utc>,
    ) -> OpsResult<()> {
        self.store.set_city_mode(city, to.as_str(), now)?;
        self.store
            .insert_policy_log(city, from.as_str(), to.as_str(), reason, auto, now)?;
        log::info!(
            "city {city}: {} -> {} ({})",
            from.as_str(),
            to.as_str(),
            if auto { "auto" } else { "approved" }
        );
        Ok(())
    }

    /// Consume exactly one pending record and apply its mode.
    pub fn approve_pending(&self, city: &str, now: DateTime<Utc>) -> OpsResult<ApprovalReceipt> {
        let pending = self
            .store
            .get_pending(city)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "pending approval",
                key: city.to_string(),
            })?;
        let current = self
            .store
            .get_city_policy(city)?
            .map(|c| c.mode)
            .unwrap_or(PolicyMode::Normal);
        self.apply_mode(
            city,
            current,
            pending.proposed_mode,
            "pending approval confirmed",
            false,
            now,
        )?;
        self.store.delete_pending(city)?;
        Ok(ApprovalReceipt {
            city_ref: city.to_string(),
            applied_mode: pending.proposed_mode,
            approved_at: crate::clock::ts(now),
        })
    }

    pub fn pending(&self) -> OpsResult<PendingList> {
        let items = self.store.list_pending()?;
        Ok(PendingList {
            total: items.len(),
            items,
        })
    }

    pub fn cities(&self, limit: i64) -> OpsResult<CityList> {
        Ok(CityList {
            items: self.store.list_cities(limit)?,
        })
    }
}

#[derive(Default)]
struct CityOutcome {
    proposed: bool,
    applied: bool,
    enqueued: bool,
}
