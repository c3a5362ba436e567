//! Data types served over HTTP.
//! These structs are the JSON wire format; field renames break consumers.

use serde::Serialize;

use crate::health::{DependencyCheck, HealthCheckResult, Status};
use crate::logbuf::LogEntry;

/// Identity reported by the camera's basic device info API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub model: Option<String>,
    pub architecture: Option<String>,
    pub soc: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub primary_interface: Option<String>,
    pub uptime_secs: Option<f64>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthDocument {
    pub service: String,
    pub host: HostInfo,
    pub status: Status,
    pub severity: &'static str,
    pub timestamp: String,
    pub checks: Vec<HealthCheckResult>,
    pub dependencies: Vec<DependencyCheck>,
}

/// Body of `GET /device`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDocument {
    pub device: DeviceInfo,
    pub stale: bool,
    pub age_secs: u64,
}

/// Body of `GET /logs`.
#[derive(Debug, Clone, Serialize)]
pub struct LogsDocument {
    pub count: usize,
    pub logs: Vec<LogEntry>,
}
