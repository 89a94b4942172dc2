use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{AggregationMode, Labels, MetricDescriptor, MetricKind};

/// Point-in-time copy of one process's registry, as served to the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySnapshot {
    /// Unique per process start; a restarted worker gets a new one.
    pub process_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub families: Vec<FamilySnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub mode: AggregationMode,
    pub label_names: Vec<String>,
    pub samples: Vec<SampleSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleSnapshot {
    pub labels: Labels,
    pub value: f64,
    pub updated_at: DateTime<Utc>,
    /// False for a series that was only pre-registered and never written.
    /// Shards that omit the field are treated as written.
    #[serde(default = "written_by_default")]
    pub written: bool,
}

fn written_by_default() -> bool {
    true
}

impl FamilySnapshot {
    pub fn from_descriptor(descriptor: &MetricDescriptor, samples: Vec<SampleSnapshot>) -> Self {
        Self {
            name: descriptor.name.clone(),
            help: descriptor.help.clone(),
            kind: descriptor.kind,
            mode: descriptor.mode,
            label_names: descriptor.label_names.clone(),
            samples,
        }
    }

    /// Whether two families can be merged: same kind, mode and label schema.
    pub fn same_schema(&self, other: &FamilySnapshot) -> bool {
        self.kind == other.kind
            && self.mode == other.mode
            && sorted(&self.label_names) == sorted(&other.label_names)
    }

    pub fn value(&self, labels: &Labels) -> Option<f64> {
        self.samples
            .iter()
            .find(|sample| &sample.labels == labels)
            .map(|sample| sample.value)
    }
}

impl RegistrySnapshot {
    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|family| family.name == name)
    }

    pub fn value(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.family(name).and_then(|family| family.value(labels))
    }

    /// Reject snapshots that could not have come from a healthy registry,
    /// e.g. a shard file that was only partially written.
    pub fn validate(&self) -> Result<(), String> {
        if self.process_id.is_empty() {
            return Err("empty process_id".to_string());
        }
        for family in &self.families {
            let descriptor = MetricDescriptor {
                name: family.name.clone(),
                help: family.help.clone(),
                kind: family.kind,
                mode: family.mode,
                label_names: family.label_names.clone(),
            };
            descriptor.validate().map_err(|error| error.to_string())?;

            let expected = sorted(&family.label_names);
            for sample in &family.samples {
                let got: Vec<String> = sample.labels.keys().cloned().collect();
                if got != expected {
                    return Err(format!(
                        "{}: sample labels {:?} do not match schema {:?}",
                        family.name, got, expected
                    ));
                }
                if !sample.value.is_finite() {
                    return Err(format!("{}: non-finite value", family.name));
                }
                if family.kind == MetricKind::Counter && sample.value < 0.0 {
                    return Err(format!("{}: negative counter value", family.name));
                }
            }
        }
        Ok(())
    }
}

fn sorted(names: &[String]) -> Vec<String> {
    let mut names = names.to_vec();
    names.sort();
    names
}
