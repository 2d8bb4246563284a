//! City policy engine tests.
//!
//! Tests cover: propose vs force thresholds, the one-pending-per-city
//! invariant, approval consumption, the minimum-volume gate, the mode
//! ladder, and the customer risk sweep.

use chrono::{DateTime, Duration, Utc};
use fulfillment_core::engine::OpsEngine;
use fulfillment_core::error::OpsError;
use fulfillment_core::policy_engine::PolicyMode;
use fulfillment_core::status::OrderStatus;
use fulfillment_core::store::OrderDraft;

fn t0() -> DateTime<Utc> {
    "2026-08-20T10:00:00Z".parse().unwrap()
}

fn build(tag: &str) -> OpsEngine {
    OpsEngine::build_test(tag).expect("build test engine")
}

/// A concluded delivery in `city`: picked up, or returned.
fn seed_concluded(
    e: &OpsEngine,
    id: &str,
    phone: &str,
    city: &str,
    returned: bool,
    at: DateTime<Utc>,
) {
    let created = at - Duration::days(3);
    e.store.insert_customer(phone, "Test", created).unwrap();
    e.store
        .insert_order(
            &OrderDraft {
                order_id: id.to_string(),
                customer_phone: phone.to_string(),
                ttn: Some(format!("ttn-{id}")),
                city_ref: city.to_string(),
                amount: 300.0,
                weight: 1.5,
                cod: true,
                shipping_cost: 50.0,
            },
            created,
        )
        .unwrap();
    e.store
        .transition_order(id, OrderStatus::Confirmed, created + Duration::hours(1))
        .unwrap();
    e.store
        .transition_order(id, OrderStatus::Shipped, created + Duration::days(1))
        .unwrap();
    if returned {
        e.store.transition_order(id, OrderStatus::Returned, at).unwrap();
    } else {
        e.store
            .transition_order(id, OrderStatus::AtWarehouse, created + Duration::days(2))
            .unwrap();
        e.store.transition_order(id, OrderStatus::PickedUp, at).unwrap();
    }
}

/// `returned` of `total` concluded deliveries in the city, events detected.
fn seed_city(e: &OpsEngine, city: &str, total: i64, returned: i64, now: DateTime<Utc>) {
    for i in 0..total {
        seed_concluded(
            e,
            &format!("{city}-o-{i}"),
            &format!("38093{:07}", i),
            city,
            i < returned,
            now - Duration::hours(total - i as i64),
        );
    }
    e.returns.run_detection(now, 1000).unwrap();
}

/// Test config: propose at 0.30, force at 0.50, minimum 3 orders.
#[test]
fn mid_rate_enqueues_one_pending() {
    let e = build("policy-propose");
    let now = t0();
    seed_city(&e, "city-1", 5, 2, now); // rate 0.40

    let result = e.policy.run_policy(now, 100).unwrap();
    assert_eq!(result.scanned_cities, 1);
    assert_eq!(result.proposed, 1);
    assert_eq!(result.applied, 0, "0.40 is below the force threshold");
    assert_eq!(result.approvals_enqueued, 1);

    let pending = e.policy.pending().unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.items[0].proposed_mode, PolicyMode::RestrictCod);
    // The city itself still runs under the old mode.
    let city = e.store.get_city_policy("city-1").unwrap().unwrap();
    assert_eq!(city.mode, PolicyMode::Normal);
}

#[test]
fn repeat_runs_absorb_into_one_pending() {
    let e = build("policy-absorb");
    let now = t0();
    seed_city(&e, "city-1", 5, 2, now);

    e.policy.run_policy(now, 100).unwrap();
    let second = e.policy.run_policy(now + Duration::hours(1), 100).unwrap();
    assert_eq!(second.proposed, 1, "the crossing is still reported");
    assert_eq!(second.approvals_enqueued, 0, "but never duplicated");
    assert_eq!(e.policy.pending().unwrap().total, 1);
    assert_eq!(e.store.pending_count("city-1").unwrap(), 1);
}

#[test]
fn extreme_rate_applies_immediately() {
    let e = build("policy-force");
    let now = t0();
    seed_city(&e, "city-1", 4, 3, now); // rate 0.75

    let result = e.policy.run_policy(now, 100).unwrap();
    assert_eq!(result.applied, 1);
    assert_eq!(result.approvals_enqueued, 0);

    let city = e.store.get_city_policy("city-1").unwrap().unwrap();
    assert_eq!(city.mode, PolicyMode::RestrictCod);
    assert_eq!(e.store.policy_log_count("city-1").unwrap(), 1);
    assert_eq!(e.policy.pending().unwrap().total, 0);
}

#[test]
fn approval_consumes_exactly_one_pending() {
    let e = build("policy-approve");
    let now = t0();
    seed_city(&e, "city-1", 5, 2, now);
    e.policy.run_policy(now, 100).unwrap();

    let receipt = e.policy.approve_pending("city-1", now).unwrap();
    assert_eq!(receipt.applied_mode, PolicyMode::RestrictCod);

    let city = e.store.get_city_policy("city-1").unwrap().unwrap();
    assert_eq!(city.mode, PolicyMode::RestrictCod);
    assert_eq!(e.policy.pending().unwrap().total, 0);
    assert_eq!(e.store.policy_log_count("city-1").unwrap(), 1);

    // Nothing left to approve.
    let err = e.policy.approve_pending("city-1", now).unwrap_err();
    assert!(matches!(err, OpsError::NotFound { .. }), "got {err}");
}

#[test]
fn thin_volume_never_proposes() {
    let e = build("policy-volume");
    let now = t0();
    seed_city(&e, "city-1", 2, 1, now); // rate 0.50 but only 2 concluded

    let result = e.policy.run_policy(now, 100).unwrap();
    assert_eq!(result.proposed, 0, "below min_orders_30d nothing triggers");
    assert_eq!(e.policy.pending().unwrap().total, 0);
}

#[test]
fn strictest_mode_is_never_reproposed() {
    let e = build("policy-ladder-top");
    let now = t0();
    seed_city(&e, "city-1", 4, 3, now);
    e.store.refresh_city_metrics("city-1", now).unwrap();
    e.store
        .set_city_mode("city-1", PolicyMode::RequirePrepay.as_str(), now)
        .unwrap();

    let result = e.policy.run_policy(now, 100).unwrap();
    assert_eq!(result.proposed, 0, "no successor past require_prepay");
    assert_eq!(result.applied, 0);
}

#[test]
fn escalation_climbs_the_ladder() {
    let e = build("policy-ladder");
    let now = t0();
    seed_city(&e, "city-1", 4, 3, now);

    e.policy.run_policy(now, 100).unwrap();
    let first = e.store.get_city_policy("city-1").unwrap().unwrap();
    assert_eq!(first.mode, PolicyMode::RestrictCod);

    // Still past the force threshold on the next run: one more step.
    e.policy.run_policy(now + Duration::hours(1), 100).unwrap();
    let second = e.store.get_city_policy("city-1").unwrap().unwrap();
    assert_eq!(second.mode, PolicyMode::RequirePrepay);
    assert_eq!(e.store.policy_log_count("city-1").unwrap(), 2);
}

#[test]
fn cities_sort_by_return_rate() {
    let e = build("policy-cities");
    let now = t0();
    seed_city(&e, "city-hot", 4, 3, now);
    seed_city(&e, "city-cool", 5, 1, now);
    e.policy.run_policy(now, 100).unwrap();

    let cities = e.policy.cities(10).unwrap();
    assert_eq!(cities.items.len(), 2);
    assert_eq!(cities.items[0].city_ref, "city-hot");
    assert!(cities.items[0].return_rate_30d > cities.items[1].return_rate_30d);
}

#[test]
fn policy_run_refreshes_returning_customers() {
    let e = build("policy-customers");
    let now = t0();
    seed_city(&e, "city-1", 4, 2, now);

    let result = e.policy.run_policy(now, 100).unwrap();
    assert_eq!(result.scanned_customers, 2, "one per returning customer");
    for phone in ["380930000000", "380930000001"] {
        assert!(
            e.store.get_risk_record(phone).unwrap().is_some(),
            "customer {phone} must be scored after the sweep"
        );
    }
}
