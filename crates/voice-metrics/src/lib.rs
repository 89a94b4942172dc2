//! Per-process metric series for voice agent sessions, plus the machinery to
//! merge every process's series into one Prometheus view.

pub mod aggregator;
pub mod bus;
pub mod catalog;
pub mod collector;
pub mod correlator;
pub mod cost;
pub mod events;
pub mod exposition;
pub mod registry;
pub mod snapshot;
pub mod source;
pub mod types;
pub mod usage;
pub mod worker;

pub use aggregator::{
    merge, CrossProcessAggregator, FailedShard, ScrapeOutcome, ScrapeReport, ShardStatus,
    ShardView, DEFAULT_STALE_AFTER,
};
pub use bus::MetricsBus;
pub use catalog::SeriesLabels;
pub use collector::{log_record, record_fast_response, MetricsCollector};
pub use correlator::{TurnLatencyCorrelator, TurnState};
pub use cost::{CostEstimator, CostModel};
pub use events::MetricEvent;
pub use exposition::{ExpositionError, ExpositionResult};
pub use registry::{
    labels, AggregationMode, Labels, MetricDescriptor, MetricKind, MetricsRegistry,
    RegistryError, RegistryResult,
};
pub use snapshot::{FamilySnapshot, RegistrySnapshot, SampleSnapshot};
pub use source::{
    publish_shard, DirectoryRegistrySource, HttpRegistrySource, RegistrySource, SourceError,
    SourceResult,
};
pub use types::{
    CostBreakdown, SessionSummary, TurnLatency, UsageDelta, UsageField, UsageSummary,
};
pub use usage::{UsageCollector, UsageDeltaAccumulator};
pub use worker::MetricsWorker;
