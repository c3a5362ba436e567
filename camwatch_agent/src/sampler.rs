//! Request-driven local sampler: one snapshot of OS counters per call.

use serde::Serialize;
use tracing::warn;

use crate::cpu::{CpuDeltaTracker, CpuUsage, UnknownReason};
use crate::error::SourceError;
use crate::source::{FilesystemSpace, InterfaceCounters, LoadAverage, LocalSource, MemoryInfo};

/// Local counters from one poll. A failed family keeps its error instead of a
/// placeholder number.
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    pub uptime_secs: Result<f64, SourceError>,
    pub memory: Result<MemoryInfo, SourceError>,
    pub load: Result<LoadAverage, SourceError>,
    pub cpu: CpuUsage,
    pub interfaces: Result<Vec<InterfaceCounters>, SourceError>,
    pub filesystem: Result<FilesystemSpace, SourceError>,
    pub process_count: Result<u64, SourceError>,
}

/// Up/down state of one source, for the `source_up` gauge.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: &'static str,
    pub up: bool,
}

impl LocalSnapshot {
    /// Busiest non-loopback interface by bytes received; ties go to the
    /// first name in sort order.
    pub fn primary_interface(&self) -> Option<&InterfaceCounters> {
        self.interfaces
            .as_ref()
            .ok()?
            .iter()
            .filter(|i| !i.is_loopback())
            .max_by(|a, b| a.rx_bytes.cmp(&b.rx_bytes).then_with(|| b.name.cmp(&a.name)))
    }

    /// Every family failed with the same reason, for when sampling itself
    /// could not run.
    pub fn unavailable(reason: &str) -> Self {
        let down = |name| SourceError::unavailable(name, "sampler", reason);
        Self {
            uptime_secs: Err(down("uptime")),
            memory: Err(down("memory")),
            load: Err(down("load")),
            cpu: CpuUsage::Unknown(UnknownReason::SourceUnavailable),
            interfaces: Err(down("network")),
            filesystem: Err(down("filesystem")),
            process_count: Err(down("processes")),
        }
    }

    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        let cpu_up = !matches!(self.cpu, CpuUsage::Unknown(UnknownReason::SourceUnavailable));
        vec![
            status("uptime", self.uptime_secs.is_ok()),
            status("memory", self.memory.is_ok()),
            status("load", self.load.is_ok()),
            status("cpu", cpu_up),
            status("network", self.interfaces.is_ok()),
            status("filesystem", self.filesystem.is_ok()),
            status("processes", self.process_count.is_ok()),
        ]
    }

    pub fn failures(&self) -> Vec<&SourceError> {
        [
            self.uptime_secs.as_ref().err(),
            self.memory.as_ref().err(),
            self.load.as_ref().err(),
            self.interfaces.as_ref().err(),
            self.filesystem.as_ref().err(),
            self.process_count.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn status(source: &'static str, up: bool) -> SourceStatus {
    SourceStatus { source, up }
}

pub struct LocalSampler {
    source: Box<dyn LocalSource>,
    cpu: CpuDeltaTracker,
}

impl LocalSampler {
    pub fn new(source: Box<dyn LocalSource>) -> Self {
        Self {
            source,
            cpu: CpuDeltaTracker::new(),
        }
    }

    pub fn sample(&self) -> LocalSnapshot {
        let cpu = match self.source.cpu_ticks() {
            Ok(raw) => self.cpu.observe(raw),
            Err(e) => {
                // keep the old baseline; the next good read diffs against it
                warn!("cpu sample failed: {e}");
                CpuUsage::Unknown(UnknownReason::SourceUnavailable)
            }
        };
        let snapshot = LocalSnapshot {
            uptime_secs: self.source.uptime(),
            memory: self.source.memory(),
            load: self.source.load_average(),
            cpu,
            interfaces: self.source.interfaces(),
            filesystem: self.source.filesystem(),
            process_count: self.source.process_count(),
        };
        for e in snapshot.failures() {
            warn!(source = e.source_name(), "local source failed: {e}");
        }
        snapshot
    }
}
