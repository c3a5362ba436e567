//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camwatch_agent::cpu::RawCpuSample;
use camwatch_agent::error::SourceError;
use camwatch_agent::health::default_checks;
use camwatch_agent::logbuf::{LogBuffer, DEFAULT_CAPACITY};
use camwatch_agent::sampler::LocalSampler;
use camwatch_agent::source::{
    FilesystemSpace, InterfaceCounters, LoadAverage, LocalSource, MemoryInfo,
};
use camwatch_agent::state::{AppState, DeviceInfoCache, TemperatureCache};

pub const MIB: u64 = 1024 * 1024;

/// Fixed readings; `memory_up` can be flipped off to simulate a missing file.
pub struct FakeSource {
    pub memory_up: Arc<AtomicBool>,
    pub available_mb: u64,
    // blocks the calling thread on every uptime read
    pub uptime_delay: Duration,
}

impl FakeSource {
    pub fn new(available_mb: u64) -> Self {
        Self {
            memory_up: Arc::new(AtomicBool::new(true)),
            available_mb,
            uptime_delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            uptime_delay: delay,
            ..Self::new(200)
        }
    }
}

impl LocalSource for FakeSource {
    fn uptime(&self) -> Result<f64, SourceError> {
        if !self.uptime_delay.is_zero() {
            std::thread::sleep(self.uptime_delay);
        }
        Ok(3600.5)
    }

    fn memory(&self) -> Result<MemoryInfo, SourceError> {
        if !self.memory_up.load(Ordering::SeqCst) {
            return Err(SourceError::unavailable(
                "memory",
                "/proc/meminfo",
                "No such file or directory",
            ));
        }
        Ok(MemoryInfo {
            total_bytes: 512 * MIB,
            available_bytes: self.available_mb * MIB,
        })
    }

    fn load_average(&self) -> Result<LoadAverage, SourceError> {
        Ok(LoadAverage {
            one: 0.5,
            five: 0.25,
            fifteen: 0.125,
        })
    }

    fn cpu_ticks(&self) -> Result<RawCpuSample, SourceError> {
        Ok(RawCpuSample {
            user: 100,
            idle: 900,
            ..Default::default()
        })
    }

    fn interfaces(&self) -> Result<Vec<InterfaceCounters>, SourceError> {
        let iface = |name: &str, rx_bytes: u64| InterfaceCounters {
            name: name.to_string(),
            rx_bytes,
            rx_packets: 10,
            rx_errors: 0,
            tx_bytes: 2048,
            tx_packets: 12,
            tx_errors: 1,
        };
        Ok(vec![iface("lo", 100), iface("eth0", 1024)])
    }

    fn filesystem(&self) -> Result<FilesystemSpace, SourceError> {
        Ok(FilesystemSpace {
            mount_point: "/".into(),
            total_bytes: 4096 * MIB,
            available_bytes: 1024 * MIB,
        })
    }

    fn process_count(&self) -> Result<u64, SourceError> {
        Ok(87)
    }
}

pub fn state_with(
    source: FakeSource,
    temperature: Option<TemperatureCache>,
    device_info: Option<DeviceInfoCache>,
) -> AppState {
    let mut checks = default_checks();
    if temperature.is_none() {
        checks.retain(|c| c.name != "temperature_celsius");
    }
    AppState::new(
        "camwatch",
        LocalSampler::new(Box::new(source)),
        temperature,
        device_info,
        checks,
        Arc::new(LogBuffer::new(DEFAULT_CAPACITY)),
    )
}
