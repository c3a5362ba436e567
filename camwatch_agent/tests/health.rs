//! Threshold evaluation and worst-case aggregation.
use camwatch_agent::health::{
    default_checks, evaluate, evaluate_with_dependencies, Check, DependencyCheck, Measurements,
    Status, ThresholdSpec,
};

fn memory_check() -> Vec<Check> {
    vec![Check::new(
        "memory_available_mb",
        ThresholdSpec::lower_is_worse(50.0, 20.0),
    )]
}

fn measured(pairs: &[(&str, f64)]) -> Measurements {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn lower_is_worse_bands() {
    let checks = memory_check();
    for (mb, expected) in [
        (80.0, Status::Ok),
        (35.0, Status::Warning),
        (10.0, Status::Critical),
    ] {
        let report = evaluate(&measured(&[("memory_available_mb", mb)]), &checks);
        assert_eq!(report.checks[0].status, expected, "{mb} MB");
        assert_eq!(report.overall, expected);
    }
}

#[test]
fn higher_is_worse_bands() {
    let spec = ThresholdSpec::higher_is_worse(70.0, 80.0);
    assert_eq!(spec.classify(46.71), Status::Ok);
    assert_eq!(spec.classify(75.0), Status::Warning);
    assert_eq!(spec.classify(85.0), Status::Critical);
}

#[test]
fn bounds_are_exclusive() {
    let lower = ThresholdSpec::lower_is_worse(50.0, 20.0);
    assert_eq!(lower.classify(50.0), Status::Ok);
    assert_eq!(lower.classify(20.0), Status::Warning);
    let higher = ThresholdSpec::higher_is_worse(80.0, 95.0);
    assert_eq!(higher.classify(80.0), Status::Ok);
    assert_eq!(higher.classify(95.0), Status::Warning);
}

#[test]
fn missing_measurement_is_unknown_and_degrades_overall() {
    let checks = default_checks();
    // everything healthy except temperature, which could not be read
    let m = measured(&[
        ("memory_available_mb", 512.0),
        ("disk_free_mb", 4096.0),
        ("cpu_usage_percent", 12.0),
        ("load_average_1m", 0.4),
    ]);
    let report = evaluate(&m, &checks);
    let temp = report
        .checks
        .iter()
        .find(|c| c.name == "temperature_celsius")
        .unwrap();
    assert_eq!(temp.status, Status::Unknown);
    assert_eq!(temp.value, None);
    assert!(report.overall.rank() >= Status::Warning.rank());
    assert_eq!(report.overall, Status::Unknown);
}

#[test]
fn critical_outranks_unknown() {
    let checks = default_checks();
    let m = measured(&[("memory_available_mb", 5.0)]);
    assert_eq!(evaluate(&m, &checks).overall, Status::Critical);
}

#[test]
fn nan_is_unknown_not_ok() {
    let report = evaluate(&measured(&[("memory_available_mb", f64::NAN)]), &memory_check());
    assert_eq!(report.checks[0].status, Status::Unknown);
}

#[test]
fn nothing_to_evaluate_is_unknown() {
    assert_eq!(evaluate(&Measurements::new(), &[]).overall, Status::Unknown);
}

#[test]
fn evaluation_is_pure() {
    let checks = default_checks();
    let m = measured(&[("memory_available_mb", 35.0), ("cpu_usage_percent", 99.0)]);
    assert_eq!(evaluate(&m, &checks), evaluate(&m, &checks));
}

#[test]
fn unreachable_dependency_warns() {
    let m = measured(&[("memory_available_mb", 80.0)]);
    let deps = vec![
        DependencyCheck::new("vapix", true),
        DependencyCheck::new("/dev/i2c-0", false),
    ];
    let report = evaluate_with_dependencies(&m, &memory_check(), deps);
    assert_eq!(report.dependencies[1].status, Status::Warning);
    assert_eq!(report.overall, Status::Warning);
}

#[test]
fn check_serializes_with_flat_threshold() {
    let report = evaluate(&measured(&[("memory_available_mb", 35.0)]), &memory_check());
    let v = serde_json::to_value(&report.checks[0]).unwrap();
    assert_eq!(v["status"], "warning");
    assert_eq!(v["warning"], 50.0);
    assert_eq!(v["critical"], 20.0);
    assert_eq!(v["direction"], "lower_is_worse");
}
