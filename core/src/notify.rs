//! Notification dispatch seam.
//!
//! RULE: Engines never talk to an SMS gateway directly. They hold a
//! `Notifier` and treat every send as fire-and-forget with a result
//! code. Implementations must bound each send by the configured
//! dispatch timeout — a timeout is a recoverable per-item failure.

use crate::clock::ts;
use crate::config::DispatchConfig;
use crate::error::{OpsError, OpsResult};
use crate::store::OpsStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    Queued,
    Sent,
    Failed,
}

impl NotifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyStatus::Queued => "queued",
            NotifyStatus::Sent => "sent",
            NotifyStatus::Failed => "failed",
        }
    }
}

/// The contract every dispatcher fulfills. `kind` tags the message class
/// ("pickup_reminder", "manual_reminder") for the draining sender.
pub trait Notifier: Send {
    fn send(
        &self,
        target: &str,
        message: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<NotifyStatus>;
}

/// Default dispatcher: enqueue into the store's notification table and
/// report `Queued`. An external sender drains the queue, so a send here
/// never blocks on the network.
pub struct QueueNotifier {
    store: OpsStore,
}

impl QueueNotifier {
    pub fn new(store: OpsStore) -> Self {
        Self { store }
    }
}

impl Notifier for QueueNotifier {
    fn send(
        &self,
        target: &str,
        message: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<NotifyStatus> {
        let id = Uuid::new_v4().to_string();
        self.store
            .enqueue_notification(&id, target, message, kind, now)?;
        log::debug!("queued {kind} notification {id} for {target}");
        Ok(NotifyStatus::Queued)
    }
}

/// Direct-gateway dispatcher for deployments without a queue drainer:
/// POSTs the message to an SMS gateway, bounded by the dispatch timeout.
pub struct GatewayNotifier {
    agent: ureq::Agent,
    endpoint: String,
}

impl GatewayNotifier {
    pub fn new(endpoint: &str, config: &DispatchConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            endpoint: endpoint.to_string(),
        }
    }
}

impl Notifier for GatewayNotifier {
    fn send(
        &self,
        target: &str,
        message: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<NotifyStatus> {
        let body = serde_json::json!({
            "target": target,
            "message": message,
            "kind": kind,
            "at": ts(now),
        });
        match self.agent.post(&self.endpoint).send_json(body) {
            Ok(_) => Ok(NotifyStatus::Sent),
            // Non-2xx means the gateway saw the message and refused it.
            Err(ureq::Error::Status(code, _)) => {
                log::warn!("gateway rejected {kind} send to {target}: HTTP {code}");
                Ok(NotifyStatus::Failed)
            }
            Err(ureq::Error::Transport(t)) => Err(OpsError::DispatchFailure {
                target: target.to_string(),
                detail: t.to_string(),
            }),
        }
    }
}

/// One captured send, for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub target: String,
    pub message: String,
    pub kind: String,
    pub at: String,
}

/// In-memory dispatcher for tests and dry runs. Records every send;
/// targets registered via `fail_target` return a dispatch failure.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    inner: Arc<Mutex<RecorderState>>,
}

#[derive(Default)]
struct RecorderState {
    sends: Vec<RecordedSend>,
    failing: Vec<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `target` fail from now on.
    pub fn fail_target(&self, target: &str) {
        self.inner.lock().unwrap().failing.push(target.to_string());
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.inner.lock().unwrap().sends.clone()
    }

    pub fn send_count(&self) -> usize {
        self.inner.lock().unwrap().sends.len()
    }
}

impl Notifier for RecordingNotifier {
    fn send(
        &self,
        target: &str,
        message: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<NotifyStatus> {
        let mut state = self.inner.lock().unwrap();
        if state.failing.iter().any(|t| t == target) {
            return Err(OpsError::DispatchFailure {
                target: target.to_string(),
                detail: "simulated gateway failure".into(),
            });
        }
        state.sends.push(RecordedSend {
            target: target.to_string(),
            message: message.to_string(),
            kind: kind.to_string(),
            at: ts(now),
        });
        Ok(NotifyStatus::Sent)
    }
}
