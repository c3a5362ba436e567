//! Per-request collection: one local snapshot plus cached remote values,
//! turned into metric families or a health document.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::warn;

use crate::cache::{Cached, RemoteCache};
use crate::error::CacheError;
use crate::exposition::MetricSet;
use crate::health::{evaluate_with_dependencies, DependencyCheck, Measurements};
use crate::logbuf::now_rfc3339;
use crate::sampler::LocalSnapshot;
use crate::state::AppState;
use crate::types::{DeviceInfo, HealthDocument, HostInfo};

const MIB: f64 = 1024.0 * 1024.0;

type Lookup<T> = Option<Result<Cached<T>, CacheError>>;

async fn lookup<T>(cache: Option<&RemoteCache<T>>) -> Lookup<T>
where
    T: Clone + Send + Sync + 'static,
{
    match cache {
        Some(c) => Some(c.get().await),
        None => None,
    }
}

fn lookup_value<T: Clone>(l: &Lookup<T>) -> Option<&Cached<T>> {
    l.as_ref()?.as_ref().ok()
}

/// Sample on the blocking pool; sysinfo refreshes and file reads must not
/// hold a runtime worker.
async fn local_snapshot(state: &AppState) -> LocalSnapshot {
    let sampler = Arc::clone(&state.sampler);
    match tokio::task::spawn_blocking(move || sampler.sample()).await {
        Ok(snap) => snap,
        Err(e) => {
            warn!("local sampling task failed: {e}");
            LocalSnapshot::unavailable(&e.to_string())
        }
    }
}

/// A device node is usable only if it opens read-write, as the camera
/// software opens it.
fn dependency_reachable(path: &Path) -> bool {
    OpenOptions::new().read(true).write(true).open(path).is_ok()
}

pub async fn collect_metrics(state: &AppState) -> MetricSet {
    let snap = local_snapshot(state).await;
    let temperature = lookup(state.temperature.as_ref()).await;
    let device = lookup(state.device_info.as_ref()).await;

    let mut set = MetricSet::new();
    local_families(&mut set, &snap);

    if let Some(t) = lookup_value(&temperature) {
        set.gauge(
            "camwatch_temperature_celsius",
            "Camera sensor temperature in degrees Celsius",
            t.value,
        );
        set.gauge(
            "camwatch_temperature_stale",
            "1 when the temperature is the last known value past its TTL",
            if t.stale { 1.0 } else { 0.0 },
        );
    }
    if let Some(d) = lookup_value(&device) {
        device_family(&mut set, &d.value);
    }

    let up_help = "1 when the source produced a value on this scrape";
    for s in snap.source_statuses() {
        set.gauge_with("camwatch_source_up", up_help, &[("source", s.source)], up(s.up));
    }
    let remote = [
        ("temperature", state.temperature.is_some(), lookup_value(&temperature).is_some()),
        ("device_info", state.device_info.is_some(), lookup_value(&device).is_some()),
    ];
    for (name, configured, ok) in remote {
        if configured {
            set.gauge_with("camwatch_source_up", up_help, &[("source", name)], up(ok));
        }
    }

    let caches = [
        state.temperature.as_ref().map(|c| (c.name().to_string(), c.stats())),
        state.device_info.as_ref().map(|c| (c.name().to_string(), c.stats())),
    ];
    for (name, stats) in caches.into_iter().flatten() {
        set.counter_with(
            "camwatch_remote_fetches_total",
            "Remote fetch attempts, retries included",
            &[("source", name.as_str())],
            stats.fetches,
        );
        set.counter_with(
            "camwatch_remote_fetch_failures_total",
            "Refreshes that ended without a new value",
            &[("source", name.as_str())],
            stats.failures,
        );
    }

    set.counter(
        "camwatch_http_requests_total",
        "HTTP requests served",
        state.http_requests.load(Ordering::Relaxed),
    );
    set
}

fn up(ok: bool) -> f64 {
    if ok {
        1.0
    } else {
        0.0
    }
}

fn local_families(set: &mut MetricSet, snap: &LocalSnapshot) {
    if let Ok(secs) = snap.uptime_secs {
        set.gauge("camwatch_uptime_seconds", "Seconds since boot", secs);
    }
    if let Ok(m) = &snap.memory {
        set.gauge(
            "camwatch_memory_total_bytes",
            "Total physical memory",
            m.total_bytes as f64,
        );
        set.gauge(
            "camwatch_memory_available_bytes",
            "Memory available for new allocations",
            m.available_bytes as f64,
        );
    }
    if let Ok(l) = &snap.load {
        set.gauge("camwatch_load_average_1m", "1 minute load average", l.one);
        set.gauge("camwatch_load_average_5m", "5 minute load average", l.five);
        set.gauge("camwatch_load_average_15m", "15 minute load average", l.fifteen);
    }
    // no sample at all rather than a fake zero
    if let Some(pct) = snap.cpu.percent() {
        set.gauge(
            "camwatch_cpu_usage_percent",
            "CPU busy share since the previous scrape",
            pct,
        );
    }
    if let Ok(fs) = &snap.filesystem {
        let path = fs.mount_point.as_str();
        set.gauge_with(
            "camwatch_disk_total_bytes",
            "Filesystem size",
            &[("path", path)],
            fs.total_bytes as f64,
        );
        set.gauge_with(
            "camwatch_disk_free_bytes",
            "Filesystem space available to unprivileged users",
            &[("path", path)],
            fs.available_bytes as f64,
        );
    }
    if let Ok(n) = snap.process_count {
        set.gauge("camwatch_process_count", "Number of processes", n as f64);
    }
    if let Ok(ifaces) = &snap.interfaces {
        for i in ifaces {
            let labels = [("interface", i.name.as_str())];
            let counters = [
                ("camwatch_network_rx_bytes_total", "Bytes received", i.rx_bytes),
                ("camwatch_network_rx_packets_total", "Packets received", i.rx_packets),
                ("camwatch_network_rx_errors_total", "Receive errors", i.rx_errors),
                ("camwatch_network_tx_bytes_total", "Bytes transmitted", i.tx_bytes),
                ("camwatch_network_tx_packets_total", "Packets transmitted", i.tx_packets),
                ("camwatch_network_tx_errors_total", "Transmit errors", i.tx_errors),
            ];
            for (name, help, v) in counters {
                set.counter_with(name, help, &labels, v);
            }
        }
    }
}

fn device_family(set: &mut MetricSet, d: &DeviceInfo) {
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    let (serial, firmware, model, arch, soc) = (
        field(&d.serial_number),
        field(&d.firmware_version),
        field(&d.model),
        field(&d.architecture),
        field(&d.soc),
    );
    set.gauge_with(
        "camwatch_device_info",
        "Camera identity, always 1",
        &[
            ("serial", serial.as_str()),
            ("firmware", firmware.as_str()),
            ("model", model.as_str()),
            ("architecture", arch.as_str()),
            ("soc", soc.as_str()),
        ],
        1.0,
    );
}

/// Named measurements for the health checks. A family that failed is simply
/// absent, which the evaluator reports as unknown.
pub fn health_measurements(snap: &LocalSnapshot, temperature: Option<f64>) -> Measurements {
    let mut m = Measurements::new();
    if let Ok(mem) = &snap.memory {
        m.insert("memory_available_mb".into(), mem.available_bytes as f64 / MIB);
    }
    if let Ok(fs) = &snap.filesystem {
        m.insert("disk_free_mb".into(), fs.available_bytes as f64 / MIB);
    }
    if let Some(pct) = snap.cpu.percent() {
        m.insert("cpu_usage_percent".into(), pct);
    }
    if let Ok(l) = &snap.load {
        m.insert("load_average_1m".into(), l.one);
    }
    if let Some(t) = temperature {
        m.insert("temperature_celsius".into(), t);
    }
    m
}

pub async fn collect_health(state: &AppState) -> HealthDocument {
    let snap = local_snapshot(state).await;
    let temperature = lookup(state.temperature.as_ref()).await;
    let temp_value = lookup_value(&temperature);

    let measurements = health_measurements(&snap, temp_value.map(|c| c.value));

    let mut dependencies = Vec::new();
    if temperature.is_some() {
        dependencies.push(DependencyCheck::new(
            "vapix",
            temp_value.is_some_and(|c| !c.stale),
        ));
    }
    for path in state.dependency_paths.iter() {
        dependencies.push(DependencyCheck::new(
            path.display().to_string(),
            dependency_reachable(path),
        ));
    }

    let report = evaluate_with_dependencies(&measurements, &state.checks, dependencies);
    HealthDocument {
        service: state.service.clone(),
        host: HostInfo {
            hostname: state.hostname.clone(),
            primary_interface: snap.primary_interface().map(|i| i.name.clone()),
            uptime_secs: snap.uptime_secs.as_ref().ok().copied(),
        },
        status: report.overall,
        severity: report.overall.severity(),
        timestamp: now_rfc3339(),
        checks: report.checks,
        dependencies: report.dependencies,
    }
}
