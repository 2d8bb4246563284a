//! Order state machine tests.
//!
//! Tests cover: the transition table, terminal states, self-transition
//! rejection, string round-trips, and the store's conditional write.

use chrono::{DateTime, Duration, Utc};
use fulfillment_core::engine::OpsEngine;
use fulfillment_core::error::OpsError;
use fulfillment_core::status::{OrderStatus, ALL_STATUSES};
use fulfillment_core::store::OrderDraft;

fn t0() -> DateTime<Utc> {
    "2026-08-01T08:00:00Z".parse().unwrap()
}

fn build(tag: &str) -> OpsEngine {
    OpsEngine::build_test(tag).expect("build test engine")
}

fn draft(id: &str, phone: &str) -> OrderDraft {
    OrderDraft {
        order_id: id.to_string(),
        customer_phone: phone.to_string(),
        ttn: Some(format!("ttn-{id}")),
        city_ref: "city-1".into(),
        amount: 100.0,
        weight: 1.0,
        cod: false,
        shipping_cost: 40.0,
    }
}

#[test]
fn terminal_states_have_no_transitions() {
    for terminal in [
        OrderStatus::PickedUp,
        OrderStatus::Returned,
        OrderStatus::Cancelled,
    ] {
        assert!(terminal.is_terminal(), "{terminal} must be terminal");
        for to in ALL_STATUSES {
            assert!(
                !terminal.can_transition(to),
                "terminal {terminal} must not transition to {to}"
            );
        }
    }
}

#[test]
fn self_transitions_rejected() {
    for status in ALL_STATUSES {
        assert!(
            !status.can_transition(status),
            "{status} -> {status} is not a transition"
        );
    }
}

#[test]
fn pipeline_order_is_enforced() {
    assert!(OrderStatus::Created.can_transition(OrderStatus::Confirmed));
    assert!(OrderStatus::Confirmed.can_transition(OrderStatus::Shipped));
    assert!(OrderStatus::Shipped.can_transition(OrderStatus::AtWarehouse));
    assert!(OrderStatus::AtWarehouse.can_transition(OrderStatus::PickedUp));

    // No skipping ahead.
    assert!(!OrderStatus::Created.can_transition(OrderStatus::PickedUp));
    assert!(!OrderStatus::Created.can_transition(OrderStatus::Shipped));
    assert!(!OrderStatus::Confirmed.can_transition(OrderStatus::AtWarehouse));
    // No moving backwards.
    assert!(!OrderStatus::Shipped.can_transition(OrderStatus::Created));
    assert!(!OrderStatus::AtWarehouse.can_transition(OrderStatus::Shipped));
}

#[test]
fn every_status_reaches_a_terminal() {
    // Walk the graph from each status; a path must end in a terminal,
    // so no order can get stuck in a non-terminal loop.
    for start in ALL_STATUSES {
        let mut frontier = vec![start];
        let mut seen = vec![start];
        let mut reaches_terminal = start.is_terminal();
        while let Some(s) = frontier.pop() {
            for &next in s.allowed_transitions() {
                if next.is_terminal() {
                    reaches_terminal = true;
                }
                if !seen.contains(&next) {
                    seen.push(next);
                    frontier.push(next);
                }
            }
        }
        assert!(reaches_terminal, "{start} cannot reach any terminal state");
    }
}

#[test]
fn status_strings_round_trip() {
    for status in ALL_STATUSES {
        let parsed: OrderStatus = status.as_str().parse().expect("parse back");
        assert_eq!(parsed, status);
    }
    assert!("teleported".parse::<OrderStatus>().is_err());
}

#[test]
fn store_rejects_invalid_transition() {
    let e = build("sm-reject");
    let now = t0();
    e.store.insert_customer("380501111111", "A", now).unwrap();
    e.store.insert_order(&draft("o-1", "380501111111"), now).unwrap();

    let err = e
        .store
        .transition_order("o-1", OrderStatus::PickedUp, now)
        .unwrap_err();
    assert!(
        matches!(err, OpsError::InvalidTransition { .. }),
        "expected InvalidTransition, got {err}"
    );
    // The rejected write must not change anything.
    let order = e.store.get_order("o-1").unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(e.store.status_log_count("o-1").unwrap(), 0);
}

#[test]
fn store_logs_every_transition() {
    let e = build("sm-log");
    let mut at = t0();
    e.store.insert_customer("380502222222", "B", at).unwrap();
    e.store.insert_order(&draft("o-2", "380502222222"), at).unwrap();

    for to in [
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::AtWarehouse,
        OrderStatus::PickedUp,
    ] {
        at = at + Duration::hours(6);
        e.store.transition_order("o-2", to, at).unwrap();
    }
    let order = e.store.get_order("o-2").unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PickedUp);
    assert!(order.arrived_at.is_some(), "arrival timestamp must be stamped");
    assert_eq!(e.store.status_log_count("o-2").unwrap(), 4);
}

#[test]
fn unknown_order_is_not_found() {
    let e = build("sm-missing");
    let err = e
        .store
        .transition_order("ghost", OrderStatus::Confirmed, t0())
        .unwrap_err();
    assert!(matches!(err, OpsError::NotFound { .. }), "got {err}");
}
