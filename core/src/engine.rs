//! The operations façade — the single construction point for the
//! control layer.
//!
//! RULES:
//!   - Engines are built here and nowhere else in production code.
//!   - Each engine holds its own connection to the same database, so
//!     any engine can be exercised independently.
//!   - The façade keeps the primary store handle open, which also keeps
//!     a shared in-memory test database alive.
//!   - Nothing here runs on a timer; callers trigger every sweep.

use crate::config::OpsConfig;
use crate::error::OpsResult;
use crate::guard::Guard;
use crate::notify::{Notifier, QueueNotifier};
use crate::pickup_engine::PickupEngine;
use crate::policy_engine::PolicyEngine;
use crate::reporting::{self, Dashboard, Timeline};
use crate::returns_engine::ReturnsEngine;
use crate::risk_engine::RiskEngine;
use crate::store::OpsStore;
use chrono::{DateTime, Utc};

pub struct OpsEngine {
    pub config: OpsConfig,
    pub store: OpsStore,
    pub risk: RiskEngine,
    pub pickup: PickupEngine,
    pub returns: ReturnsEngine,
    pub policy: PolicyEngine,
    pub guard: Guard,
}

impl OpsEngine {
    /// Production wiring: file-backed database, config from
    /// `{data_dir}/ops_config.json`, queue-backed notifier.
    pub fn build(db_path: &str, data_dir: &str) -> OpsResult<Self> {
        let config = OpsConfig::load(data_dir)?;
        let store = OpsStore::open(db_path)?;
        Self::wire(config, store, None)
    }

    /// Test wiring: shared in-memory database named by `tag`, test
    /// config, queue-backed notifier.
    pub fn build_test(tag: &str) -> OpsResult<Self> {
        Self::build_test_with(tag, None)
    }

    /// Test wiring with an injected notifier (recording, failing).
    pub fn build_test_with(tag: &str, notifier: Option<Box<dyn Notifier>>) -> OpsResult<Self> {
        let store = OpsStore::in_memory_shared(tag)?;
        Self::wire(OpsConfig::default_test(), store, notifier)
    }

    fn wire(
        config: OpsConfig,
        store: OpsStore,
        notifier: Option<Box<dyn Notifier>>,
    ) -> OpsResult<Self> {
        config.validate()?;
        store.migrate()?;

        let notifier = match notifier {
            Some(n) => n,
            None => Box::new(QueueNotifier::new(store.reopen()?)) as Box<dyn Notifier>,
        };
        let risk = RiskEngine::new(config.clone(), store.reopen()?)?;
        let pickup = PickupEngine::new(config.clone(), store.reopen()?, notifier)?;
        let returns = ReturnsEngine::new(config.clone(), store.reopen()?)?;
        let policy = PolicyEngine::new(
            config.clone(),
            store.reopen()?,
            RiskEngine::new(config.clone(), store.reopen()?)?,
        )?;
        let guard = Guard::new(store.reopen()?);

        Ok(Self {
            config,
            store,
            risk,
            pickup,
            returns,
            policy,
            guard,
        })
    }

    pub fn dashboard(&self, now: DateTime<Utc>) -> OpsResult<Dashboard> {
        reporting::dashboard(&self.store, &self.risk, &self.pickup, &self.returns, now)
    }

    pub fn timeline(&self, phone: &str, limit: i64) -> OpsResult<Timeline> {
        reporting::timeline(&self.store, phone, limit)
    }
}
