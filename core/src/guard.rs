//! Guard incidents — anomaly flags on a customer.
//!
//! Lifecycle: `open -> muted(until) -> open` (when the window lapses),
//! `open|muted -> resolved` (terminal). The risk engine opens incidents;
//! operators mute and resolve them through this module.

use crate::clock::parse_ts;
use crate::error::{OpsError, OpsResult};
use crate::store::OpsStore;
use crate::types::CustomerId;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Row from the `incident` table. `status` is the stored state; the
/// effective state of a lapsed mute is `open` (see `effective_status`).
#[derive(Debug, Clone, Serialize)]
pub struct IncidentRow {
    pub incident_id: String,
    pub customer_phone: CustomerId,
    pub kind: String,
    pub status: String,
    pub detail: String,
    pub opened_at: String,
    pub last_seen_at: String,
    pub muted_until: Option<String>,
    pub resolved_at: Option<String>,
}

impl IncidentRow {
    /// A mute window in the past is equivalent to unmuted.
    pub fn effective_status(&self, now: DateTime<Utc>) -> &str {
        if self.status == "muted" {
            if let Some(until) = &self.muted_until {
                if parse_ts(until).map(|u| u <= now).unwrap_or(true) {
                    return "open";
                }
            }
        }
        &self.status
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentReceipt {
    pub ok: bool,
    pub incident_id: String,
    pub status: String,
}

pub struct Guard {
    store: OpsStore,
}

impl Guard {
    pub fn new(store: OpsStore) -> Self {
        Self { store }
    }

    pub fn list(&self, status: Option<&str>, limit: i64) -> OpsResult<Vec<IncidentRow>> {
        self.store.list_incidents(status, limit)
    }

    /// Temporary suppression. Muting an already-muted incident just
    /// moves the window; a resolved incident is `NotFound` for muting.
    pub fn mute(
        &self,
        incident_id: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> OpsResult<IncidentReceipt> {
        let muted = self
            .store
            .mute_incident(incident_id, now + Duration::days(days))?;
        if !muted {
            return Err(OpsError::NotFound {
                kind: "live incident",
                key: incident_id.to_string(),
            });
        }
        Ok(IncidentReceipt {
            ok: true,
            incident_id: incident_id.to_string(),
            status: "muted".into(),
        })
    }

    /// Terminal for this occurrence; resolving twice is a soft success.
    pub fn resolve(&self, incident_id: &str, now: DateTime<Utc>) -> OpsResult<IncidentReceipt> {
        let row = self
            .store
            .get_incident(incident_id)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "incident",
                key: incident_id.to_string(),
            })?;
        if row.status != "resolved" {
            self.store.resolve_incident(incident_id, now)?;
        }
        Ok(IncidentReceipt {
            ok: true,
            incident_id: incident_id.to_string(),
            status: "resolved".into(),
        })
    }
}
