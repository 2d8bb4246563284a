//! Risk scoring engine — per-customer risk with manual override.
//!
//! This engine:
//!   1. Pulls a behavioral feature snapshot from the order store
//!   2. Computes a weighted 0-100 score, deterministic for equal inputs
//!   3. Maps the score to a band via configured cutoffs
//!   4. Masks the computed score with an unexpired operator override
//!   5. Opens/refreshes a guard incident when the band reaches the
//!      configured alerting band
//!
//! Triggered on demand by an operator action or the external scheduler.

use crate::clock::{parse_ts, ts};
use crate::config::OpsConfig;
use crate::error::{OpsError, OpsResult};
use crate::store::OpsStore;
use crate::types::CustomerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Public types ───────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
            RiskBand::Critical => "critical",
        }
    }
}

impl std::str::FromStr for RiskBand {
    type Err = OpsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "low" => Ok(RiskBand::Low),
            "medium" => Ok(RiskBand::Medium),
            "high" => Ok(RiskBand::High),
            "critical" => Ok(RiskBand::Critical),
            _ => Err(OpsError::Unrecognized {
                what: "risk band",
                raw: raw.to_string(),
            }),
        }
    }
}

/// Feature snapshot the score was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFeatures {
    pub non_pickup_rate: f64,
    pub cancel_rate: f64,
    pub complaint_count: i64,
    pub chargeback_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskOverride {
    pub score: i64,
    pub until: String,
    pub set_by: String,
    pub set_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRecord {
    pub customer_phone: CustomerId,
    pub score: i64,
    pub band: RiskBand,
    pub features: RiskFeatures,
    pub computed_at: String,
    pub r#override: Option<RiskOverride>,
}

/// Coverage rollup for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub total_customers: i64,
    pub scored_customers: i64,
    pub coverage_rate: f64,
    pub distribution: BTreeMap<String, i64>,
    pub recent_high: Vec<HighRiskEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HighRiskEntry {
    pub customer_phone: CustomerId,
    pub score: i64,
    pub band: RiskBand,
    pub computed_at: String,
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct RiskEngine {
    config: OpsConfig,
    store: OpsStore,
}

impl RiskEngine {
    /// Fails on an invalid config — never at run time.
    pub fn new(config: OpsConfig, store: OpsStore) -> OpsResult<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    /// Band for a score under the configured cutoffs.
    pub fn band_for(&self, score: i64) -> RiskBand {
        let r = &self.config.risk;
        if score >= r.critical_from {
            RiskBand::Critical
        } else if score >= r.high_from {
            RiskBand::High
        } else if score >= r.medium_from {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    /// The single masking rule used by every read path: an unexpired
    /// override wins, otherwise the computed score stands.
    pub fn effective(&self, record: &RiskRecord, now: DateTime<Utc>) -> (i64, RiskBand) {
        if let Some(ov) = &record.r#override {
            if let Ok(until) = parse_ts(&ov.until) {
                if until > now {
                    return (ov.score, self.band_for(ov.score));
                }
            }
        }
        (record.score, record.band)
    }

    /// Recompute and persist the customer's risk record. A customer with
    /// no order history scores the baseline 0 / Low; an unknown customer
    /// is `NotFound`.
    pub fn recalculate(&self, phone: &str, now: DateTime<Utc>) -> OpsResult<RiskRecord> {
        if !self.store.customer_exists(phone)? {
            return Err(OpsError::NotFound {
                kind: "customer",
                key: phone.to_string(),
            });
        }
        let stats = self.store.customer_order_stats(phone)?;
        let (complaints, chargebacks) = self.store.customer_counters(phone)?;

        let concluded = stats.concluded();
        let features = RiskFeatures {
            non_pickup_rate: if concluded > 0 {
                stats.returned as f64 / concluded as f64
            } else {
                0.0
            },
            cancel_rate: if stats.total > 0 {
                stats.cancelled as f64 / stats.total as f64
            } else {
                0.0
            },
            complaint_count: complaints,
            chargeback_count: chargebacks,
        };
        let score = self.score(&features);
        let band = self.band_for(score);

        self.store
            .upsert_risk_record(phone, score, band, &features, now)?;
        let record = self.must_get(phone)?;

        let (eff_score, eff_band) = self.effective(&record, now);
        if eff_band >= self.config.risk.incident_band {
            self.store.open_or_refresh_incident(
                phone,
                "high_risk",
                &format!("risk score {eff_score} ({})", eff_band.as_str()),
                now,
            )?;
            log::info!("customer {phone} scored {eff_score} ({})", eff_band.as_str());
        }
        Ok(record)
    }

    fn score(&self, f: &RiskFeatures) -> i64 {
        let r = &self.config.risk;
        let sat = r.count_saturation as f64;
        let complaint_part = (f.complaint_count as f64 / sat).min(1.0);
        let chargeback_part = (f.chargeback_count as f64 / sat).min(1.0);

        let raw = r.weight_non_pickup * f.non_pickup_rate
            + r.weight_cancel * f.cancel_rate
            + r.weight_complaint * complaint_part
            + r.weight_chargeback * chargeback_part;
        (raw.round() as i64).clamp(0, 100)
    }

    /// Mask the computed score with `score` until `until` elapses. A
    /// customer never scored before gets the baseline record first, so
    /// the override always has a record to sit on.
    pub fn apply_override(
        &self,
        phone: &str,
        score: i64,
        until: DateTime<Utc>,
        by: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<RiskRecord> {
        if self.store.get_risk_record(phone)?.is_none() {
            self.recalculate(phone, now)?;
        }
        self.store
            .set_risk_override(phone, score.clamp(0, 100), &ts(until), by, now)?;
        self.must_get(phone)
    }

    pub fn clear_override(&self, phone: &str) -> OpsResult<RiskRecord> {
        if self.store.get_risk_record(phone)?.is_none() {
            return Err(OpsError::NotFound {
                kind: "risk record",
                key: phone.to_string(),
            });
        }
        self.store.clear_risk_override(phone)?;
        self.must_get(phone)
    }

    /// Effective-band counts across all scored customers. Bands with no
    /// customers are present with a zero count so dashboards get a
    /// stable shape.
    pub fn distribution(&self, now: DateTime<Utc>) -> OpsResult<BTreeMap<String, i64>> {
        let mut counts: BTreeMap<String, i64> = [
            RiskBand::Low,
            RiskBand::Medium,
            RiskBand::High,
            RiskBand::Critical,
        ]
        .iter()
        .map(|b| (b.as_str().to_string(), 0))
        .collect();
        for record in self.store.all_risk_records()? {
            let (_, band) = self.effective(&record, now);
            *counts.entry(band.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn summary(&self, now: DateTime<Utc>) -> OpsResult<RiskSummary> {
        let total = self.store.customer_count()?;
        let records = self.store.all_risk_records()?;
        let scored = records.len() as i64;

        let mut recent_high: Vec<HighRiskEntry> = records
            .iter()
            .filter_map(|r| {
                let (score, band) = self.effective(r, now);
                (band >= RiskBand::High).then(|| HighRiskEntry {
                    customer_phone: r.customer_phone.clone(),
                    score,
                    band,
                    computed_at: r.computed_at.clone(),
                })
            })
            .collect();
        recent_high.sort_by(|a, b| b.computed_at.cmp(&a.computed_at));
        recent_high.truncate(self.config.risk.recent_high_limit);

        Ok(RiskSummary {
            total_customers: total,
            scored_customers: scored,
            coverage_rate: if total > 0 {
                scored as f64 / total as f64
            } else {
                0.0
            },
            distribution: self.distribution(now)?,
            recent_high,
        })
    }

    fn must_get(&self, phone: &str) -> OpsResult<RiskRecord> {
        self.store
            .get_risk_record(phone)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "risk record",
                key: phone.to_string(),
            })
    }
}
