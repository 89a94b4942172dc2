use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::snapshot::{FamilySnapshot, RegistrySnapshot, SampleSnapshot};

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Label name to label value, ordered so equal sets compare and hash equally.
pub type Labels = BTreeMap<String, String>;

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("metric {0} is already registered with a different definition")]
    ConflictingRegistration(String),

    #[error("invalid descriptor for {name}: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("labels {got:?} do not match schema {expected:?} of {name}")]
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("counter {name} cannot be incremented by {value}")]
    NegativeIncrement { name: String, value: f64 },

    #[error("non-finite value {value} for {name}")]
    NonFinite { name: String, value: f64 },

    #[error("{name} is a {kind} and does not accept {operation}")]
    WrongWriteContract {
        name: String,
        kind: MetricKind,
        operation: &'static str,
    },
}

/// How the aggregator combines one series across worker processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Counter: add every process's increments.
    Sum,
    /// Gauge with a single logical writer: newest write wins.
    LastWriteWins,
    /// Gauge every process contributes to: add each process's latest value.
    SumOfLatest,
}

impl AggregationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::LastWriteWins => "last_write_wins",
            Self::SumOfLatest => "sum_of_latest",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Counter => f.write_str("counter"),
            Self::Gauge => f.write_str("gauge"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub mode: AggregationMode,
    pub label_names: Vec<String>,
}

impl MetricDescriptor {
    pub fn counter(name: &str, help: &str, label_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Counter,
            mode: AggregationMode::Sum,
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn gauge(name: &str, help: &str, mode: AggregationMode, label_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Gauge,
            mode,
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Counters are always summed and gauges never are.
    pub fn validate(&self) -> RegistryResult<()> {
        let consistent = match self.kind {
            MetricKind::Counter => self.mode == AggregationMode::Sum,
            MetricKind::Gauge => self.mode != AggregationMode::Sum,
        };
        if !consistent {
            return Err(RegistryError::InvalidDescriptor {
                name: self.name.clone(),
                reason: format!("{} cannot use {} aggregation", self.kind, self.mode.as_str()),
            });
        }
        if self.name.is_empty() {
            return Err(RegistryError::InvalidDescriptor {
                name: self.name.clone(),
                reason: "empty name".to_string(),
            });
        }
        Ok(())
    }

    fn check_labels(&self, labels: &Labels) -> RegistryResult<()> {
        let matches = labels.len() == self.label_names.len()
            && self.label_names.iter().all(|name| labels.contains_key(name));
        if matches {
            Ok(())
        } else {
            let mut expected = self.label_names.clone();
            expected.sort();
            Err(RegistryError::LabelMismatch {
                name: self.name.clone(),
                expected,
                got: labels.keys().cloned().collect(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    updated_at: DateTime<Utc>,
    /// False until the first real write; pre-registered zeros stay false.
    written: bool,
}

/// Per-process metric registry.
///
/// Constructed explicitly by the process's composition root and shared via
/// `Arc`. Families must be registered before any series is written, and every
/// series a process can emit should be pre-registered at zero.
pub struct MetricsRegistry {
    process_id: String,
    started_at: DateTime<Utc>,
    families: DashMap<String, MetricDescriptor>,
    series: DashMap<(String, Labels), Sample>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_process_id(Uuid::new_v4().to_string())
    }

    pub fn with_process_id(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            started_at: Utc::now(),
            families: DashMap::new(),
            series: DashMap::new(),
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Register a family. Re-registering an identical descriptor is a no-op.
    pub fn register(&self, descriptor: MetricDescriptor) -> RegistryResult<()> {
        descriptor.validate()?;
        match self.families.entry(descriptor.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get() == &descriptor {
                    Ok(())
                } else {
                    Err(RegistryError::ConflictingRegistration(descriptor.name))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<MetricDescriptor> {
        self.families.get(name).map(|entry| entry.value().clone())
    }

    /// Create a series at zero unless it already exists.
    pub fn preregister(&self, name: &str, labels: &Labels) -> RegistryResult<()> {
        self.checked(name, labels)?;
        self.series
            .entry((name.to_string(), labels.clone()))
            .or_insert_with(|| Sample {
                value: 0.0,
                updated_at: Utc::now(),
                written: false,
            });
        Ok(())
    }

    /// Add a non-negative increment to a counter series.
    pub fn inc(&self, name: &str, labels: &Labels, value: f64) -> RegistryResult<()> {
        let descriptor = self.checked(name, labels)?;
        if descriptor.kind != MetricKind::Counter {
            return Err(RegistryError::WrongWriteContract {
                name: name.to_string(),
                kind: descriptor.kind,
                operation: "inc",
            });
        }
        if !value.is_finite() {
            return Err(RegistryError::NonFinite {
                name: name.to_string(),
                value,
            });
        }
        if value < 0.0 {
            return Err(RegistryError::NegativeIncrement {
                name: name.to_string(),
                value,
            });
        }
        self.update(name, labels, |current| current + value);
        Ok(())
    }

    /// Overwrite a gauge series.
    pub fn set(&self, name: &str, labels: &Labels, value: f64) -> RegistryResult<()> {
        self.check_gauge_write(name, labels, value, "set")?;
        self.update(name, labels, |_| value);
        Ok(())
    }

    /// Adjust a gauge series by `delta`, e.g. active sessions going up or down.
    pub fn add(&self, name: &str, labels: &Labels, delta: f64) -> RegistryResult<()> {
        self.check_gauge_write(name, labels, delta, "add")?;
        self.update(name, labels, |current| current + delta);
        Ok(())
    }

    pub fn get(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.series
            .get(&(name.to_string(), labels.clone()))
            .map(|sample| sample.value)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut samples_by_family: HashMap<String, Vec<SampleSnapshot>> = HashMap::new();
        for entry in self.series.iter() {
            let (name, labels) = entry.key();
            samples_by_family
                .entry(name.clone())
                .or_default()
                .push(SampleSnapshot {
                    labels: labels.clone(),
                    value: entry.value().value,
                    updated_at: entry.value().updated_at,
                    written: entry.value().written,
                });
        }

        let mut families: Vec<FamilySnapshot> = self
            .families
            .iter()
            .map(|entry| {
                let descriptor = entry.value();
                let mut samples = samples_by_family.remove(&descriptor.name).unwrap_or_default();
                samples.sort_by(|a, b| a.labels.cmp(&b.labels));
                FamilySnapshot::from_descriptor(descriptor, samples)
            })
            .collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));

        RegistrySnapshot {
            process_id: self.process_id.clone(),
            pid: std::process::id(),
            started_at: self.started_at,
            captured_at: Utc::now(),
            families,
        }
    }

    fn checked(&self, name: &str, labels: &Labels) -> RegistryResult<MetricDescriptor> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))?;
        descriptor.check_labels(labels)?;
        Ok(descriptor)
    }

    fn check_gauge_write(
        &self,
        name: &str,
        labels: &Labels,
        value: f64,
        operation: &'static str,
    ) -> RegistryResult<()> {
        let descriptor = self.checked(name, labels)?;
        if descriptor.kind != MetricKind::Gauge {
            return Err(RegistryError::WrongWriteContract {
                name: name.to_string(),
                kind: descriptor.kind,
                operation,
            });
        }
        if !value.is_finite() {
            return Err(RegistryError::NonFinite {
                name: name.to_string(),
                value,
            });
        }
        Ok(())
    }

    fn update(&self, name: &str, labels: &Labels, apply: impl FnOnce(f64) -> f64) {
        let now = Utc::now();
        let mut sample = self
            .series
            .entry((name.to_string(), labels.clone()))
            .or_insert_with(|| Sample {
                value: 0.0,
                updated_at: now,
                written: false,
            });
        sample.value = apply(sample.value);
        sample.updated_at = now;
        sample.written = true;
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
