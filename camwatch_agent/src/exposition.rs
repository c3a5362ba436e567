//! Metric families and the Prometheus text exposition format (0.0.4).
//!
//! Counter vs gauge is part of the contract: scrapers take rates of counters
//! and plot gauges as-is.

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Only ever increases (until a restart resets it).
    Counter,
    /// Can go up and down.
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// Families in insertion order; samples with the same name are grouped.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    families: Vec<MetricFamily>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gauge(&mut self, name: &str, help: &str, value: f64) {
        self.push(name, help, MetricKind::Gauge, &[], value);
    }

    pub fn counter(&mut self, name: &str, help: &str, value: u64) {
        self.push(name, help, MetricKind::Counter, &[], value as f64);
    }

    pub fn gauge_with(&mut self, name: &str, help: &str, labels: &[(&str, &str)], value: f64) {
        self.push(name, help, MetricKind::Gauge, labels, value);
    }

    pub fn counter_with(&mut self, name: &str, help: &str, labels: &[(&str, &str)], value: u64) {
        self.push(name, help, MetricKind::Counter, labels, value as f64);
    }

    fn push(&mut self, name: &str, help: &str, kind: MetricKind, labels: &[(&str, &str)], value: f64) {
        let sample = Sample {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
        };
        match self.families.iter_mut().find(|f| f.name == name) {
            Some(f) if f.kind != kind => {
                warn!(metric = name, "dropping sample: registered as {}", f.kind.as_str());
            }
            Some(f) => f.samples.push(sample),
            None => self.families.push(MetricFamily {
                name: name.to_string(),
                help: help.to_string(),
                kind,
                samples: vec![sample],
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn families(&self) -> &[MetricFamily] {
        &self.families
    }

    /// Encode through a per-scrape `prometheus::Registry`. The encoder emits
    /// families sorted by name and samples sorted by label values.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let registry = Registry::new();
        for f in &self.families {
            register_family(&registry, f)?;
        }
        let mut buf = Vec::with_capacity(self.families.len() * 128);
        TextEncoder::new().encode(&registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn register_family(registry: &Registry, f: &MetricFamily) -> Result<(), prometheus::Error> {
    let opts = Opts::new(f.name.as_str(), f.help.as_str());
    // the first sample fixes the label names of the family
    let names: Vec<&str> = f
        .samples
        .first()
        .map(|s| s.labels.iter().map(|(k, _)| k.as_str()).collect())
        .unwrap_or_default();
    let rows = f.samples.iter().filter_map(|s| {
        let keys_match = s.labels.len() == names.len()
            && s.labels.iter().zip(&names).all(|((k, _), n)| k == n);
        if !keys_match {
            warn!(metric = %f.name, "dropping sample: label names differ from the family");
            return None;
        }
        let values: Vec<&str> = s.labels.iter().map(|(_, v)| v.as_str()).collect();
        Some((values, s.value))
    });
    match f.kind {
        MetricKind::Gauge => {
            let vec = GaugeVec::new(opts, &names)?;
            for (values, v) in rows {
                vec.get_metric_with_label_values(values.as_slice())?.set(v);
            }
            registry.register(Box::new(vec))
        }
        MetricKind::Counter => {
            let vec = IntCounterVec::new(opts, &names)?;
            for (values, v) in rows {
                vec.get_metric_with_label_values(values.as_slice())?.inc_by(v as u64);
            }
            registry.register(Box::new(vec))
        }
    }
}
