use chrono::{TimeZone, Utc};
use helion::regulation::simple::{SimpleRegulator, SimpleSettings};
use helion::regulation::{RegulationInput, Regulator};

fn settings() -> SimpleSettings {
    SimpleSettings {
        surplus_threshold: 200.0,
        hysteresis_margin: 100.0,
    }
}

fn input(grid_power: f64, is_off_peak: bool) -> RegulationInput {
    RegulationInput {
        grid_power,
        current_charging: 0.0,
        is_off_peak,
        max_current: 40.0,
        max_house_power: 12000.0,
        target_power: 0.0,
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

#[test]
fn starts_on_surplus() {
    let regulator = SimpleRegulator::new(settings());

    let output = regulator.calculate(&input(-2000.0, false));

    assert!((output.target_current - 2000.0 / 230.0).abs() < 1e-9);
    assert!(output.should_charge);
    assert_eq!(output.reason, "Starting charge - surplus detected");
}

#[test]
fn stays_stopped_without_surplus() {
    let regulator = SimpleRegulator::new(settings());

    let output = regulator.calculate(&input(-100.0, false));

    assert_eq!(output.target_current, 0.0);
    assert!(!output.should_charge);
    assert_eq!(output.reason, "No surplus - staying stopped");
}

#[test]
fn hysteresis_keeps_charge_alive_between_thresholds() {
    let regulator = SimpleRegulator::new(settings());

    regulator.calculate(&input(-2000.0, false));

    // -150 W is below the start threshold but still under the stop
    // threshold of -(200 - 100) = -100 W
    let output = regulator.calculate(&input(-150.0, false));

    assert_eq!(output.reason, "Continuing charge - surplus available");
    assert!((output.target_current - 150.0 / 230.0).abs() < 1e-9);
}

#[test]
fn stops_once_surplus_is_gone() {
    let regulator = SimpleRegulator::new(settings());

    regulator.calculate(&input(-2000.0, false));
    let output = regulator.calculate(&input(-50.0, false));

    assert_eq!(output.target_current, 0.0);
    assert!(!output.should_charge);
    assert_eq!(output.reason, "No more surplus - stopping charge");
}

#[test]
fn target_is_bounded_by_max_current() {
    let regulator = SimpleRegulator::new(settings());

    let output = regulator.calculate(&input(-20000.0, false));

    assert_eq!(output.target_current, 40.0);
}

#[test]
fn off_peak_is_independent_of_grid_power() {
    let regulator = SimpleRegulator::new(settings());

    let a = regulator.calculate(&input(-5000.0, true));
    let b = regulator.calculate(&input(3000.0, true));

    assert_eq!(a.target_current, b.target_current);
    assert_eq!(a.should_charge, b.should_charge);
}

#[test]
fn reset_clears_charging_state() {
    let regulator = SimpleRegulator::new(settings());

    regulator.calculate(&input(-2000.0, false));
    regulator.reset();

    let status = regulator.status();
    assert!(!status["is_charging"].as_bool().unwrap());
}
