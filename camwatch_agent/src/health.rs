//! Threshold checks reduced to one worst-case verdict.
//!
//! Evaluation is a pure function of the measurements and checks passed in.
//! A check without a measurement is reported as `Unknown`, and `Unknown`
//! ranks above `Warning` so an unmeasurable subsystem always degrades the
//! overall status.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type Measurements = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warning,
    Unknown,
    Critical,
}

impl Status {
    /// Aggregation rank: Ok < Warning < Unknown < Critical.
    pub fn rank(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Unknown => 2,
            Status::Critical => 3,
        }
    }

    pub fn worst(self, other: Status) -> Status {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Warning => "warning",
            Status::Unknown => "unknown",
            Status::Critical => "critical",
        }
    }

    /// Alerting severity for the report envelope.
    pub fn severity(self) -> &'static str {
        match self {
            Status::Ok => "info",
            Status::Warning | Status::Unknown => "warning",
            Status::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Status worsens as the value drops (free memory, free disk).
    LowerIsWorse,
    /// Status worsens as the value rises (CPU, load, temperature).
    HigherIsWorse,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub warning: f64,
    pub critical: f64,
    pub direction: Direction,
}

impl ThresholdSpec {
    pub fn lower_is_worse(warning: f64, critical: f64) -> Self {
        Self {
            warning,
            critical,
            direction: Direction::LowerIsWorse,
        }
    }

    pub fn higher_is_worse(warning: f64, critical: f64) -> Self {
        Self {
            warning,
            critical,
            direction: Direction::HigherIsWorse,
        }
    }

    /// Bounds are exclusive: sitting exactly on a bound does not cross it.
    pub fn classify(&self, value: f64) -> Status {
        if value.is_nan() {
            return Status::Unknown;
        }
        let past = |bound: f64| match self.direction {
            Direction::LowerIsWorse => value < bound,
            Direction::HigherIsWorse => value > bound,
        };
        if past(self.critical) {
            Status::Critical
        } else if past(self.warning) {
            Status::Warning
        } else {
            Status::Ok
        }
    }
}

/// One configured check: which measurement, which bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    #[serde(flatten)]
    pub spec: ThresholdSpec,
}

impl Check {
    pub fn new(name: impl Into<String>, spec: ThresholdSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

pub fn default_checks() -> Vec<Check> {
    vec![
        Check::new("memory_available_mb", ThresholdSpec::lower_is_worse(50.0, 20.0)),
        Check::new("disk_free_mb", ThresholdSpec::lower_is_worse(100.0, 50.0)),
        Check::new("temperature_celsius", ThresholdSpec::higher_is_worse(70.0, 80.0)),
        Check::new("cpu_usage_percent", ThresholdSpec::higher_is_worse(80.0, 95.0)),
        Check::new("load_average_1m", ThresholdSpec::higher_is_worse(4.0, 8.0)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: Status,
    pub value: Option<f64>,
    #[serde(flatten)]
    pub threshold: ThresholdSpec,
    pub message: String,
}

/// Reachability of something the service depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyCheck {
    pub service: String,
    pub reachable: bool,
    pub status: Status,
}

impl DependencyCheck {
    pub fn new(service: impl Into<String>, reachable: bool) -> Self {
        Self {
            service: service.into(),
            reachable,
            status: if reachable {
                Status::Ok
            } else {
                Status::Warning
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall: Status,
    pub checks: Vec<HealthCheckResult>,
    pub dependencies: Vec<DependencyCheck>,
}

pub fn evaluate(measurements: &Measurements, checks: &[Check]) -> HealthReport {
    evaluate_with_dependencies(measurements, checks, Vec::new())
}

pub fn evaluate_with_dependencies(
    measurements: &Measurements,
    checks: &[Check],
    dependencies: Vec<DependencyCheck>,
) -> HealthReport {
    let results: Vec<HealthCheckResult> = checks
        .iter()
        .map(|c| check_one(c, measurements.get(&c.name).copied()))
        .collect();

    let overall = results
        .iter()
        .map(|r| r.status)
        .chain(dependencies.iter().map(|d| d.status))
        .reduce(Status::worst)
        .unwrap_or(Status::Unknown);

    HealthReport {
        overall,
        checks: results,
        dependencies,
    }
}

fn check_one(check: &Check, value: Option<f64>) -> HealthCheckResult {
    let spec = check.spec;
    let (status, message) = match value {
        None => (
            Status::Unknown,
            format!("{} could not be measured", check.name),
        ),
        Some(v) if v.is_nan() => (
            Status::Unknown,
            format!("{} measurement is not a number", check.name),
        ),
        Some(v) => {
            let status = spec.classify(v);
            let side = match spec.direction {
                Direction::LowerIsWorse => "below",
                Direction::HigherIsWorse => "above",
            };
            let message = match status {
                Status::Critical => {
                    format!("{} {v:.2} {side} critical bound {}", check.name, spec.critical)
                }
                Status::Warning => {
                    format!("{} {v:.2} {side} warning bound {}", check.name, spec.warning)
                }
                _ => format!("{} {v:.2} within bounds", check.name),
            };
            (status, message)
        }
    };
    HealthCheckResult {
        name: check.name.clone(),
        status,
        value: value.filter(|v| !v.is_nan()),
        threshold: spec,
        message,
    }
}
