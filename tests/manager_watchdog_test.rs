mod common;

use chrono::{Duration, Utc};
use common::{absolute, drain_updates, harness, two_stations};
use std::sync::atomic::Ordering;

#[test]
fn fresh_data_leaves_charging_alone() {
    let h = harness(absolute(10.0), two_stations());
    let now = Utc::now();
    let s1 = h.registry.get("station1").unwrap();
    s1.set_connected(true, now);
    s1.set_charging(true);
    s1.set_current_limit(10.0);

    h.grid.update(-1000.0, now);
    h.tariff.update(false, now);
    h.manager.check_data_freshness(now);

    assert_eq!(s1.current_limit(), 10.0);
    assert_eq!(h.reset_calls.load(Ordering::Relaxed), 0);
}

#[test]
fn stale_grid_data_stops_all_charging() {
    let mut h = harness(absolute(10.0), two_stations());
    let now = Utc::now();
    let s1 = h.registry.get("station1").unwrap();
    s1.set_connected(true, now);
    s1.set_charging(true);
    s1.set_current_limit(10.0);

    h.grid.update(-1000.0, now);
    h.tariff.update(false, now);

    // Six minutes of silence and the next tick must force a safe state
    h.manager.check_data_freshness(now + Duration::minutes(6));

    assert_eq!(s1.current_limit(), 0.0);
    assert!(h.reset_calls.load(Ordering::Relaxed) >= 1);

    let updates = drain_updates(&mut h.updates_rx);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].limit, 0.0);
}

#[test]
fn stale_tariff_data_stops_all_charging() {
    let h = harness(absolute(10.0), two_stations());
    let now = Utc::now();
    let s1 = h.registry.get("station1").unwrap();
    s1.set_connected(true, now);
    s1.set_charging(true);
    s1.set_current_limit(10.0);

    // Grid stays fresh, tariff goes silent
    let check_at = now + Duration::minutes(6);
    h.grid.update(-1000.0, check_at - Duration::seconds(30));
    h.tariff.update(false, now);

    h.manager.check_data_freshness(check_at);

    assert_eq!(s1.current_limit(), 0.0);
    assert!(h.reset_calls.load(Ordering::Relaxed) >= 1);
}

#[test]
fn watchdog_never_runs_the_regulator() {
    let h = harness(absolute(10.0), two_stations());
    let now = Utc::now();
    h.registry
        .get("station1")
        .unwrap()
        .set_connected(true, now);

    h.grid.update(-1000.0, now);
    h.tariff.update(false, now);

    h.manager.check_data_freshness(now);
    h.manager.check_data_freshness(now + Duration::minutes(6));

    assert_eq!(h.calculate_calls.load(Ordering::Relaxed), 0);
}

#[test]
fn stale_data_also_gates_the_decision_path() {
    // Cache timestamps sit six minutes in the past when the wake arrives
    let now = Utc::now();
    let h = common::harness_at(absolute(10.0), two_stations(), now - Duration::minutes(6));
    let s1 = h.registry.get("station1").unwrap();
    s1.set_connected(true, now);
    s1.set_charging(true);
    s1.set_current_limit(10.0);

    h.grid.update(-1000.0, now - Duration::minutes(6));
    h.manager.on_grid_power_update();

    assert_eq!(s1.current_limit(), 0.0);
    assert_eq!(h.calculate_calls.load(Ordering::Relaxed), 0);
}
