//! CPU utilisation from consecutive `/proc/stat` tick samples.
//!
//! A single sample says nothing about load; usage is only defined between two
//! samples taken by the same [`CpuDeltaTracker`].

use std::sync::{Mutex, PoisonError};

use crate::error::SourceError;

/// Aggregate tick counters from the first `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawCpuSample {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl RawCpuSample {
    /// Parse the aggregate line: "cpu  user nice system idle iowait irq softirq steal ...".
    /// Kernels without a steal column report it as zero.
    pub fn parse_stat_line(line: &str) -> Result<Self, SourceError> {
        let mut it = line.split_whitespace();
        match it.next() {
            Some("cpu") => {}
            other => {
                return Err(SourceError::parse(
                    "cpu",
                    format!("expected aggregate cpu line, found {other:?}"),
                ))
            }
        }
        let mut vals = [0u64; 8];
        let mut n = 0;
        for tok in it.take(8) {
            vals[n] = tok
                .parse::<u64>()
                .map_err(|e| SourceError::parse("cpu", format!("tick field {n} {tok:?}: {e}")))?;
            n += 1;
        }
        if n < 7 {
            return Err(SourceError::parse(
                "cpu",
                format!("expected at least 7 tick fields, found {n}"),
            ));
        }
        Ok(RawCpuSample {
            user: vals[0],
            nice: vals[1],
            system: vals[2],
            idle: vals[3],
            iowait: vals[4],
            irq: vals[5],
            softirq: vals[6],
            steal: vals[7],
        })
    }

    fn fields(&self) -> [u64; 8] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    /// No earlier sample to diff against.
    FirstSample,
    /// A counter went backwards; the current sample became the new baseline.
    CounterReset,
    /// The counters did not advance between the two samples.
    NoProgress,
    /// `/proc/stat` could not be read or parsed.
    SourceUnavailable,
}

impl UnknownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownReason::FirstSample => "first_sample",
            UnknownReason::CounterReset => "counter_reset",
            UnknownReason::NoProgress => "no_progress",
            UnknownReason::SourceUnavailable => "source_unavailable",
        }
    }
}

/// CPU usage for one poll. `Unknown` is never folded into zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuUsage {
    Percent(f64),
    Unknown(UnknownReason),
}

impl CpuUsage {
    pub fn percent(&self) -> Option<f64> {
        match self {
            CpuUsage::Percent(p) => Some(*p),
            CpuUsage::Unknown(_) => None,
        }
    }
}

/// Usage between two samples of the same tracker.
///
/// Any category that decreased means the counters were reset (reboot, wrap),
/// which is reported rather than computed through an underflow.
pub fn usage_between(prev: &RawCpuSample, curr: &RawCpuSample) -> CpuUsage {
    let mut total: u64 = 0;
    for (p, c) in prev.fields().iter().zip(curr.fields()) {
        match c.checked_sub(*p) {
            Some(d) => total = total.saturating_add(d),
            None => return CpuUsage::Unknown(UnknownReason::CounterReset),
        }
    }
    if total == 0 {
        return CpuUsage::Unknown(UnknownReason::NoProgress);
    }
    // idle and iowait both advanced (checked above), so idle <= total
    let idle = curr.idle_ticks().saturating_sub(prev.idle_ticks());
    let busy = total.saturating_sub(idle);
    CpuUsage::Percent((busy as f64 * 100.0 / total as f64).clamp(0.0, 100.0))
}

/// Holds the previous tick sample between polls.
///
/// The read of the old sample and the store of the new one happen under one
/// lock, so concurrent polls never see a half-written baseline.
#[derive(Debug, Default)]
pub struct CpuDeltaTracker {
    previous: Mutex<Option<RawCpuSample>>,
}

impl CpuDeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `current` as the new baseline and return usage since the old one.
    pub fn observe(&self, current: RawCpuSample) -> CpuUsage {
        let mut prev = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        let usage = match prev.as_ref() {
            None => CpuUsage::Unknown(UnknownReason::FirstSample),
            Some(p) => usage_between(p, &current),
        };
        *prev = Some(current);
        usage
    }

    pub fn previous(&self) -> Option<RawCpuSample> {
        *self.previous.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
