//! Raw local metric sources.
//!
//! One read per metric family, each failing on its own. [`SystemSource`] asks
//! sysinfo for uptime, memory, load, processes, interfaces and filesystem
//! space, and reads the aggregate CPU line from `<proc root>/stat`.

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use sysinfo::{Disks, Networks, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::cpu::RawCpuSample;
use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Cumulative counters for one interface since it came up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

impl InterfaceCounters {
    pub fn is_loopback(&self) -> bool {
        self.name == "lo"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesystemSpace {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Independent reads, one per metric family. No ordering between them.
pub trait LocalSource: Send + Sync {
    fn uptime(&self) -> Result<f64, SourceError>;
    fn memory(&self) -> Result<MemoryInfo, SourceError>;
    fn load_average(&self) -> Result<LoadAverage, SourceError>;
    fn cpu_ticks(&self) -> Result<RawCpuSample, SourceError>;
    fn interfaces(&self) -> Result<Vec<InterfaceCounters>, SourceError>;
    fn filesystem(&self) -> Result<FilesystemSpace, SourceError>;
    fn process_count(&self) -> Result<u64, SourceError>;
}

pub struct SystemSource {
    proc_root: PathBuf,
    disk_path: PathBuf,
    // persistent handles, refreshed per read
    system: Mutex<System>,
    networks: Mutex<Networks>,
    disks: Mutex<Disks>,
}

impl SystemSource {
    pub fn new(proc_root: impl Into<PathBuf>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            disk_path: disk_path.into(),
            system: Mutex::new(System::new()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a sysinfo refresh, turning a panic inside it into a failed family.
fn refreshed<R>(source_name: &'static str, f: impl FnOnce() -> R) -> Result<R, SourceError> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|_| SourceError::unavailable(source_name, "sysinfo", "refresh panicked"))
}

impl LocalSource for SystemSource {
    fn uptime(&self) -> Result<f64, SourceError> {
        // sysinfo reports 0 when the uptime could not be read
        match System::uptime() {
            0 => Err(SourceError::unavailable("uptime", "sysinfo", "no uptime reported")),
            secs => Ok(secs as f64),
        }
    }

    fn memory(&self) -> Result<MemoryInfo, SourceError> {
        let mut sys = self.system();
        refreshed("memory", || sys.refresh_memory())?;
        let total_bytes = sys.total_memory();
        if total_bytes == 0 {
            return Err(SourceError::unavailable("memory", "sysinfo", "no memory reported"));
        }
        Ok(MemoryInfo {
            total_bytes,
            available_bytes: sys.available_memory().min(total_bytes),
        })
    }

    fn load_average(&self) -> Result<LoadAverage, SourceError> {
        let l = System::load_average();
        if ![l.one, l.five, l.fifteen].iter().all(|v| v.is_finite() && *v >= 0.0) {
            return Err(SourceError::parse("load", format!("implausible load {l:?}")));
        }
        Ok(LoadAverage {
            one: l.one,
            five: l.five,
            fifteen: l.fifteen,
        })
    }

    fn cpu_ticks(&self) -> Result<RawCpuSample, SourceError> {
        let path = self.proc_root.join("stat");
        let s = fs::read_to_string(&path)
            .map_err(|e| SourceError::unavailable("cpu", path.display().to_string(), e))?;
        let line = s
            .lines()
            .next()
            .ok_or_else(|| SourceError::parse("cpu", "empty stat file"))?;
        RawCpuSample::parse_stat_line(line)
    }

    fn interfaces(&self) -> Result<Vec<InterfaceCounters>, SourceError> {
        let mut nets = self.networks.lock().unwrap_or_else(PoisonError::into_inner);
        refreshed("network", || nets.refresh(true))?;
        // every host has at least loopback; nothing listed means nothing was readable
        if nets.list().is_empty() {
            return Err(SourceError::unavailable("network", "sysinfo", "no interfaces listed"));
        }
        let mut out: Vec<InterfaceCounters> = nets
            .iter()
            .map(|(name, data)| InterfaceCounters {
                name: name.to_string(),
                rx_bytes: data.total_received(),
                rx_packets: data.total_packets_received(),
                rx_errors: data.total_errors_on_received(),
                tx_bytes: data.total_transmitted(),
                tx_packets: data.total_packets_transmitted(),
                tx_errors: data.total_errors_on_transmitted(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn filesystem(&self) -> Result<FilesystemSpace, SourceError> {
        let mut disks = self.disks.lock().unwrap_or_else(PoisonError::into_inner);
        refreshed("filesystem", || disks.refresh(true))?;
        // deepest mount point containing the path wins ("/" loses to "/var/lib")
        disks
            .list()
            .iter()
            .filter(|d| self.disk_path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| FilesystemSpace {
                mount_point: d.mount_point().display().to_string(),
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            })
            .ok_or_else(|| {
                SourceError::unavailable(
                    "filesystem",
                    self.disk_path.display().to_string(),
                    "no mounted filesystem contains this path",
                )
            })
    }

    fn process_count(&self) -> Result<u64, SourceError> {
        let mut sys = self.system();
        refreshed("processes", || {
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing(),
            )
        })?;
        match sys.processes().len() {
            0 => Err(SourceError::unavailable("processes", "sysinfo", "no processes listed")),
            n => Ok(n as u64),
        }
    }
}
