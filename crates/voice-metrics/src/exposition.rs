//! Prometheus text encoding of merged metric families.

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::registry::MetricKind;
use crate::snapshot::{FamilySnapshot, SampleSnapshot};

pub type ExpositionResult<T> = Result<T, ExpositionError>;

#[derive(Debug, Error)]
pub enum ExpositionError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("encoded metrics are not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Content type of the text exposition format.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

/// Encode families in the Prometheus text format.
///
/// A fresh `prometheus::Registry` is built per call, so encoding never
/// touches any process's live registry.
pub fn render(families: &[FamilySnapshot]) -> ExpositionResult<String> {
    let registry = Registry::new();

    for family in families {
        let help = if family.help.is_empty() {
            family.name.clone()
        } else {
            family.help.clone()
        };
        let opts = Opts::new(family.name.clone(), help);
        let label_names: Vec<&str> = family.label_names.iter().map(String::as_str).collect();

        match family.kind {
            MetricKind::Counter => {
                let counter = CounterVec::new(opts, &label_names)?;
                for sample in &family.samples {
                    counter
                        .get_metric_with_label_values(&label_values(family, sample))?
                        .inc_by(sample.value.max(0.0));
                }
                registry.register(Box::new(counter))?;
            }
            MetricKind::Gauge => {
                let gauge = GaugeVec::new(opts, &label_names)?;
                for sample in &family.samples {
                    gauge
                        .get_metric_with_label_values(&label_values(family, sample))?
                        .set(sample.value);
                }
                registry.register(Box::new(gauge))?;
            }
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn label_values<'a>(family: &'a FamilySnapshot, sample: &'a SampleSnapshot) -> Vec<&'a str> {
    family
        .label_names
        .iter()
        .map(|name| sample.labels.get(name).map(String::as_str).unwrap_or(""))
        .collect()
}
