//! Guard incident tests.
//!
//! Tests cover: the one-live-incident rule, idempotent mute and
//! resolve, mute expiry, and resolve winning over mute.

use chrono::{DateTime, Duration, Utc};
use fulfillment_core::engine::OpsEngine;
use fulfillment_core::error::OpsError;

fn t0() -> DateTime<Utc> {
    "2026-08-05T07:00:00Z".parse().unwrap()
}

fn build(tag: &str) -> OpsEngine {
    let e = OpsEngine::build_test(tag).expect("build test engine");
    e.store.insert_customer("380991234567", "Test", t0()).unwrap();
    e
}

#[test]
fn redetection_refreshes_the_live_incident() {
    let e = build("inc-refresh");
    let first = e
        .store
        .open_or_refresh_incident("380991234567", "high_risk", "score 80", t0())
        .unwrap();
    let second = e
        .store
        .open_or_refresh_incident(
            "380991234567",
            "high_risk",
            "score 85",
            t0() + Duration::hours(4),
        )
        .unwrap();

    assert_eq!(first.incident_id, second.incident_id, "never duplicated");
    assert_eq!(second.detail, "score 85");
    assert!(second.last_seen_at > first.last_seen_at);
    assert_eq!(e.guard.list(None, 10).unwrap().len(), 1);
}

#[test]
fn mute_is_temporary_and_idempotent() {
    let e = build("inc-mute");
    let incident = e
        .store
        .open_or_refresh_incident("380991234567", "high_risk", "score 80", t0())
        .unwrap();

    e.guard.mute(&incident.incident_id, 3, t0()).unwrap();
    // Muting again just moves the window.
    e.guard.mute(&incident.incident_id, 5, t0()).unwrap();

    let row = e.store.get_incident(&incident.incident_id).unwrap().unwrap();
    assert_eq!(row.status, "muted");
    assert_eq!(row.effective_status(t0() + Duration::days(1)), "muted");
    assert_eq!(
        row.effective_status(t0() + Duration::days(6)),
        "open",
        "a lapsed mute window is equivalent to unmuted"
    );
    assert_eq!(e.store.open_incident_count(t0() + Duration::days(6)).unwrap(), 1);
}

#[test]
fn resolve_is_terminal_and_wins_over_mute() {
    let e = build("inc-resolve");
    let incident = e
        .store
        .open_or_refresh_incident("380991234567", "high_risk", "score 80", t0())
        .unwrap();
    e.guard.mute(&incident.incident_id, 30, t0()).unwrap();

    let receipt = e.guard.resolve(&incident.incident_id, t0()).unwrap();
    assert!(receipt.ok);
    let row = e.store.get_incident(&incident.incident_id).unwrap().unwrap();
    assert_eq!(row.status, "resolved");
    assert!(row.muted_until.is_none(), "resolve clears the mute");

    // Resolving twice is a soft success; muting a resolved incident is not.
    assert!(e.guard.resolve(&incident.incident_id, t0()).unwrap().ok);
    let err = e.guard.mute(&incident.incident_id, 3, t0()).unwrap_err();
    assert!(matches!(err, OpsError::NotFound { .. }), "got {err}");
}

#[test]
fn resolution_keeps_history_and_allows_a_fresh_incident() {
    let e = build("inc-history");
    let first = e
        .store
        .open_or_refresh_incident("380991234567", "high_risk", "score 80", t0())
        .unwrap();
    e.guard.resolve(&first.incident_id, t0()).unwrap();

    let second = e
        .store
        .open_or_refresh_incident(
            "380991234567",
            "high_risk",
            "score 90",
            t0() + Duration::days(2),
        )
        .unwrap();
    assert_ne!(first.incident_id, second.incident_id, "a new occurrence");
    assert_eq!(e.guard.list(None, 10).unwrap().len(), 2, "history survives");
    assert_eq!(e.guard.list(Some("open"), 10).unwrap().len(), 1);
}

#[test]
fn unknown_incident_is_not_found() {
    let e = build("inc-missing");
    let err = e.guard.resolve("ghost", t0()).unwrap_err();
    assert!(matches!(err, OpsError::NotFound { .. }), "got {err}");
}
