//! Unit tests for crank cadence estimation.

use ridelink::metrics::cadence::{CadenceCalculator, CadenceRegistry, DEFAULT_MAX_CADENCE_RPM};
use ridelink::metrics::rollover::{modular_diff, u16_counter_diff};

#[test]
fn test_ten_revolutions_in_one_second() {
    let mut calc = CadenceCalculator::with_max_rpm("pm", 1000);
    assert_eq!(calc.calculate(100, 0), None);
    assert_eq!(calc.calculate(110, 1024), Some(600));
}

#[test]
fn test_default_ceiling_discards_600_rpm() {
    let mut calc = CadenceCalculator::new("pm");
    calc.calculate(100, 0);
    assert_eq!(calc.calculate(110, 1024), None);
    // The sample was still replaced, so the next delta starts from it.
    assert_eq!(calc.calculate(111, 2048), Some(60));
}

#[test]
fn test_wraparound_matches_unwrapped_counters() {
    let mut wrapped = CadenceCalculator::with_max_rpm("wrapped", 1000);
    wrapped.calculate(65530, 65000);
    let wrapped_rpm = wrapped.calculate(5, 500);

    let mut plain = CadenceCalculator::with_max_rpm("plain", 1000);
    plain.calculate(0, 0);
    let plain_rpm = plain.calculate(11, 1036);

    assert!(wrapped_rpm.is_some());
    assert_eq!(wrapped_rpm, plain_rpm);
    // 11 revolutions in 1036/1024 s
    assert_eq!(wrapped_rpm, Some(652));
}

#[test]
fn test_repeated_event_time_keeps_first_sample() {
    let mut calc = CadenceCalculator::new("csc");
    assert_eq!(calc.calculate(100, 1000), None);
    assert_eq!(calc.calculate(101, 1000), None);

    // Delta is measured against the first sample: 3 revs in 2 s.
    assert_eq!(calc.calculate(103, 3048), Some(90));
}

#[test]
fn test_coasting_reports_zero() {
    let mut calc = CadenceCalculator::new("pm");
    calc.calculate(500, 1024);
    assert_eq!(calc.calculate(500, 3072), Some(0));
}

#[test]
fn test_reset_starts_over() {
    let mut calc = CadenceCalculator::new("pm");
    calc.calculate(10, 0);
    calc.reset();
    assert!(!calc.has_previous());
    assert_eq!(calc.calculate(13, 2048), None);
    assert!(calc.has_previous());
}

#[test]
fn test_registry_per_sensor_state() {
    let registry = CadenceRegistry::new(DEFAULT_MAX_CADENCE_RPM);
    registry.calculate("left", 0, 0);
    registry.calculate("right", 1000, 30000);

    assert_eq!(registry.calculate("left", 3, 2048), Some(90));
    assert_eq!(registry.calculate("right", 1002, 32048), Some(60));
    assert_eq!(registry.active_sensors(), vec!["left".to_string(), "right".to_string()]);

    assert!(registry.remove("left"));
    assert!(!registry.remove("left"));
    assert_eq!(registry.active_sensors(), vec!["right".to_string()]);

    registry.reset_all();
    assert!(!registry.has_previous("right"));
    registry.clear();
    assert!(registry.active_sensors().is_empty());
}

#[test]
fn test_modular_diff() {
    assert_eq!(modular_diff(5, 65530, 65536), 11);
    assert_eq!(modular_diff(10, 3, 65536), 7);
    assert_eq!(modular_diff(4, 4, 65536), 0);
    assert_eq!(modular_diff(4, 9, 0), 0);
    assert_eq!(u16_counter_diff(500, 65000), 1036);
}
