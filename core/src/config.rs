use crate::error::{OpsError, OpsResult};
use crate::risk_engine::RiskBand;
use serde::{Deserialize, Serialize};

// ── Risk scoring ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Band cutoffs: a score at or above the cutoff lands in the band.
    /// Must be strictly increasing and within 1..=100.
    pub medium_from: i64,
    pub high_from: i64,
    pub critical_from: i64,
    /// Points each feature can contribute to the 0-100 score.
    pub weight_non_pickup: f64,
    pub weight_cancel: f64,
    pub weight_complaint: f64,
    pub weight_chargeback: f64,
    /// Complaint/chargeback counts saturate at this many occurrences.
    pub count_saturation: i64,
    /// Effective band at or above which a recalculation opens a guard incident.
    pub incident_band: RiskBand,
    /// Cap on the recent-high-risk list in the summary rollup.
    pub recent_high_limit: usize,
}

// ── Pickup control ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupConfig {
    /// Ascending day boundaries. An order's tier is the highest boundary
    /// its days-at-point has reached; the last one is the high-risk bucket.
    pub tier_days: Vec<i64>,
    /// Reminder text. `{ttn}` and `{days}` are substituted at dispatch.
    pub reminder_template: String,
    /// Mute window applied when the operator does not give one.
    pub default_mute_days: i64,
}

// ── Returns ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnsConfig {
    /// Loss recorded for a return when the order has no shipping cost
    /// on file (legacy rows imported without one).
    pub fallback_shipping_cost: f64,
}

// ── City policy ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 30-day return rate at which a stricter mode is proposed
    /// (pending approval).
    pub propose_rate: f64,
    /// Return rate at which the stricter mode applies immediately.
    pub force_rate: f64,
    /// Cities with fewer concluded deliveries in 30 days are ignored.
    pub min_orders_30d: i64,
}

// ── Outbound dispatch & carrier ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on any single notification send.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    pub base_url: String,
    pub api_key: String,
    /// Connect and read timeout for carrier lookups.
    pub timeout_ms: u64,
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub risk: RiskConfig,
    pub pickup: PickupConfig,
    pub returns: ReturnsConfig,
    pub policy: PolicyConfig,
    pub dispatch: DispatchConfig,
    pub carrier: CarrierConfig,
    /// An engine lock older than this is presumed orphaned and reclaimed.
    pub lock_ttl_minutes: i64,
}

impl OpsConfig {
    /// Load from `{data_dir}/ops_config.json`.
    /// In tests, use OpsConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/ops_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: OpsConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Threshold shape check. Engine constructors call this, so a bad
    /// config fails at construction and never mid-run.
    pub fn validate(&self) -> OpsResult<()> {
        let r = &self.risk;
        if !(1..=100).contains(&r.medium_from)
            || !(r.medium_from < r.high_from && r.high_from < r.critical_from)
            || r.critical_from > 100
        {
            return Err(OpsError::InvalidConfig(format!(
                "band cutoffs must be increasing within 1..=100, got {}/{}/{}",
                r.medium_from, r.high_from, r.critical_from
            )));
        }
        for (name, w) in [
            ("weight_non_pickup", r.weight_non_pickup),
            ("weight_cancel", r.weight_cancel),
            ("weight_complaint", r.weight_complaint),
            ("weight_chargeback", r.weight_chargeback),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(OpsError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {w}"
                )));
            }
        }
        if r.count_saturation < 1 {
            return Err(OpsError::InvalidConfig(format!(
                "count_saturation must be >= 1, got {}",
                r.count_saturation
            )));
        }
        if r.recent_high_limit == 0 {
            return Err(OpsError::InvalidConfig(
                "recent_high_limit must be >= 1".into(),
            ));
        }

        let p = &self.pickup;
        if p.tier_days.is_empty() {
            return Err(OpsError::InvalidConfig("tier_days must not be empty".into()));
        }
        if p.tier_days[0] < 1 || p.tier_days.windows(2).any(|w| w[0] >= w[1]) {
            return Err(OpsError::InvalidConfig(format!(
                "tier_days must be strictly increasing and start at >= 1, got {:?}",
                p.tier_days
            )));
        }
        if p.default_mute_days < 1 {
            return Err(OpsError::InvalidConfig(format!(
                "default_mute_days must be >= 1, got {}",
                p.default_mute_days
            )));
        }

        if self.returns.fallback_shipping_cost < 0.0 {
            return Err(OpsError::InvalidConfig(
                "fallback_shipping_cost must not be negative".into(),
            ));
        }

        let pol = &self.policy;
        if !(pol.propose_rate > 0.0 && pol.propose_rate < pol.force_rate && pol.force_rate <= 1.0) {
            return Err(OpsError::InvalidConfig(format!(
                "need 0 < propose_rate < force_rate <= 1, got {}/{}",
                pol.propose_rate, pol.force_rate
            )));
        }
        if pol.min_orders_30d < 1 {
            return Err(OpsError::InvalidConfig(format!(
                "min_orders_30d must be >= 1, got {}",
                pol.min_orders_30d
            )));
        }

        if self.dispatch.timeout_ms == 0 || self.carrier.timeout_ms == 0 {
            return Err(OpsError::InvalidConfig("timeouts must be > 0".into()));
        }
        if self.lock_ttl_minutes < 1 {
            return Err(OpsError::InvalidConfig(format!(
                "lock_ttl_minutes must be >= 1, got {}",
                self.lock_ttl_minutes
            )));
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        Self {
            risk: RiskConfig {
                medium_from: 25,
                high_from: 50,
                critical_from: 75,
                weight_non_pickup: 55.0,
                weight_cancel: 20.0,
                weight_complaint: 10.0,
                weight_chargeback: 15.0,
                count_saturation: 5,
                incident_band: RiskBand::Critical,
                recent_high_limit: 10,
            },
            pickup: PickupConfig {
                tier_days: vec![2, 5, 7],
                reminder_template: "Parcel {ttn} has been waiting at the pickup point for {days} days. Please collect it.".into(),
                default_mute_days: 7,
            },
            returns: ReturnsConfig {
                fallback_shipping_cost: 90.0,
            },
            policy: PolicyConfig {
                propose_rate: 0.30,
                force_rate: 0.50,
                min_orders_30d: 3,
            },
            dispatch: DispatchConfig { timeout_ms: 3_000 },
            carrier: CarrierConfig {
                base_url: "http://127.0.0.1:9/carrier".into(),
                api_key: "test-key".into(),
                timeout_ms: 2_000,
            },
            lock_ttl_minutes: 10,
        }
    }
}
