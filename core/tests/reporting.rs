//! Reporting façade and operator action tests.
//!
//! Tests cover: the dashboard rollup (computed on read), the customer
//! timeline, and end-to-end dispatch of serde-tagged operator actions.

use chrono::{DateTime, Duration, Utc};
use fulfillment_core::command::{dispatch, OperatorAction};
use fulfillment_core::engine::OpsEngine;
use fulfillment_core::status::OrderStatus;
use fulfillment_core::store::OrderDraft;

fn t0() -> DateTime<Utc> {
    "2026-08-18T09:00:00Z".parse().unwrap()
}

fn build(tag: &str) -> OpsEngine {
    OpsEngine::build_test(tag).expect("build test engine")
}

fn seed_order(e: &OpsEngine, id: &str, phone: &str, path: &[OrderStatus], at: DateTime<Utc>) {
    e.store.insert_customer(phone, "Test", at).unwrap();
    e.store
        .insert_order(
            &OrderDraft {
                order_id: id.to_string(),
                customer_phone: phone.to_string(),
                ttn: Some(format!("ttn-{id}")),
                city_ref: "city-1".into(),
                amount: 500.0,
                weight: 1.0,
                cod: true,
                shipping_cost: 45.0,
            },
            at,
        )
        .unwrap();
    for (i, &to) in path.iter().enumerate() {
        e.store
            .transition_order(id, to, at + Duration::hours(i as i64 + 1))
            .unwrap();
    }
}

#[test]
fn dashboard_reflects_authoritative_state() {
    let e = build("report-dashboard");
    let now = t0();
    // One waiting at the pickup point for 6 days, one returned.
    seed_order(
        &e,
        "o-wait",
        "380661000001",
        &[OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::AtWarehouse],
        now - Duration::days(6),
    );
    seed_order(
        &e,
        "o-ret",
        "380661000002",
        &[OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Returned],
        now - Duration::days(2),
    );
    e.pickup.run(now, 100).unwrap();
    e.returns.run_detection(now, 100).unwrap();
    e.risk.recalculate("380661000002", now).unwrap();

    let dash = e.dashboard(now).unwrap();
    assert_eq!(dash.orders_by_status["at_warehouse"], 1);
    assert_eq!(dash.orders_by_status["returned"], 1);
    assert_eq!(dash.returns.today, 1);
    assert_eq!(dash.pickup.amount_at_risk, 500.0);
    assert_eq!(dash.risk_bands.values().sum::<i64>(), 1, "one scored customer");
    assert_eq!(
        dash.queued_notifications, 1,
        "the pickup reminder sits in the queue"
    );
}

#[test]
fn timeline_lists_newest_first() {
    let e = build("report-timeline");
    let now = t0();
    seed_order(
        &e,
        "o-1",
        "380661000003",
        &[OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::AtWarehouse],
        now - Duration::days(1),
    );

    let timeline = e.timeline("380661000003", 10).unwrap();
    assert_eq!(timeline.entries.len(), 3);
    assert_eq!(timeline.entries[0].to_status, "at_warehouse");
    assert_eq!(timeline.entries[2].from_status, "created");
    assert!(timeline
        .entries
        .windows(2)
        .all(|w| w[0].changed_at >= w[1].changed_at));
}

#[test]
fn operator_actions_round_trip_as_json() {
    let e = build("report-actions");
    let now = t0();
    seed_order(
        &e,
        "o-1",
        "380661000004",
        &[OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::AtWarehouse],
        now - Duration::days(6),
    );

    let action: OperatorAction =
        serde_json::from_str(r#"{"action":"run_pickup","limit":50}"#).unwrap();
    let result = dispatch(&e, action, now).unwrap();
    assert_eq!(result["processed"], 1);
    assert_eq!(result["sent"], 1);

    let mute: OperatorAction =
        serde_json::from_str(r#"{"action":"mute","ttn":"ttn-o-1","days":4}"#).unwrap();
    let receipt = dispatch(&e, mute, now).unwrap();
    assert_eq!(receipt["muted_days"], 4);

    let kpi = dispatch(&e, OperatorAction::PickupKpi, now).unwrap();
    assert_eq!(kpi["amount_at_risk"], 0.0, "muted order is out of the KPI");

    let err = dispatch(
        &e,
        OperatorAction::RecalcRisk {
            customer: "380000000000".into(),
        },
        now,
    )
    .unwrap_err();
    assert!(err.to_string().contains("not found"), "got {err}");
}
