use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::registry::{AggregationMode, Labels};
use crate::snapshot::{FamilySnapshot, RegistrySnapshot, SampleSnapshot};
use crate::source::{snapshot_age, RegistrySource};

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// One shard as seen by a merge pass.
#[derive(Debug, Clone, Copy)]
pub struct ShardView<'a> {
    pub snapshot: &'a RegistrySnapshot,
    /// Read successfully during the current pass.
    pub fresh: bool,
}

/// Merge shards into one set of families, sorted by name.
///
/// Sum families take every shard. Gauge families only take fresh shards, so
/// the live state of a worker that stopped answering vanishes at once while
/// its counters stay until the shard is evicted. Within a family, Sum and
/// SumOfLatest series add up and LastWriteWins keeps the newest written
/// sample, falling back to a placeholder zero only when nobody wrote one.
/// A family whose schema disagrees with the first declaration seen is
/// dropped for that shard.
pub fn merge(shards: &[ShardView<'_>]) -> Vec<FamilySnapshot> {
    let mut merged: BTreeMap<String, (FamilySnapshot, BTreeMap<Labels, SampleSnapshot>)> =
        BTreeMap::new();

    for shard in shards {
        for family in &shard.snapshot.families {
            if family.mode != AggregationMode::Sum && !shard.fresh {
                continue;
            }

            let (declared, samples) = merged.entry(family.name.clone()).or_insert_with(|| {
                let mut declared = family.clone();
                declared.samples = Vec::new();
                (declared, BTreeMap::new())
            });

            if !declared.same_schema(family) {
                warn!(
                    "shard {} declares {} as {}/{} {:?}, expected {}/{} {:?}; skipping it",
                    shard.snapshot.process_id,
                    family.name,
                    family.kind,
                    family.mode.as_str(),
                    family.label_names,
                    declared.kind,
                    declared.mode.as_str(),
                    declared.label_names,
                );
                continue;
            }

            for sample in &family.samples {
                match samples.get_mut(&sample.labels) {
                    None => {
                        samples.insert(sample.labels.clone(), sample.clone());
                    }
                    Some(existing) => match family.mode {
                        AggregationMode::Sum | AggregationMode::SumOfLatest => {
                            existing.value += sample.value;
                            existing.updated_at = existing.updated_at.max(sample.updated_at);
                            existing.written |= sample.written;
                        }
                        AggregationMode::LastWriteWins => {
                            if supersedes(sample, existing) {
                                *existing = sample.clone();
                            }
                        }
                    },
                }
            }
        }
    }

    merged
        .into_values()
        .map(|(mut family, samples)| {
            family.samples = samples.into_values().collect();
            family
        })
        .collect()
}

/// A written sample always beats a pre-registered placeholder, whatever
/// their timestamps. Between two of the same kind the newer one wins.
fn supersedes(candidate: &SampleSnapshot, current: &SampleSnapshot) -> bool {
    match (candidate.written, current.written) {
        (true, false) => true,
        (false, true) => false,
        _ => candidate.updated_at > current.updated_at,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShardStatus {
    pub process_id: String,
    pub pid: u32,
    pub origin: String,
    pub captured_at: DateTime<Utc>,
    /// Seconds since the last successful read.
    pub age_secs: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailedShard {
    pub source: String,
    pub location: String,
    pub error: String,
}

/// What one scrape pass saw, served on the aggregator's `/shards` endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScrapeReport {
    pub scraped_at: DateTime<Utc>,
    /// Read this pass with live gauges; every family merged.
    pub fresh: Vec<ShardStatus>,
    /// Counters only: unreadable this pass, or read but too old for gauges.
    pub retained: Vec<ShardStatus>,
    pub failed: Vec<FailedShard>,
    pub evicted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub families: Vec<FamilySnapshot>,
    pub report: ScrapeReport,
}

struct CachedShard {
    snapshot: RegistrySnapshot,
    origin: String,
    last_success: Instant,
}

/// Reads every worker registry it can find and merges them.
///
/// Holds no state about the workers besides the shard cache, so it can run
/// for as long as the deployment lives while workers come and go.
pub struct CrossProcessAggregator {
    sources: Vec<Box<dyn RegistrySource>>,
    shards: DashMap<String, CachedShard>,
    stale_after: Duration,
    last_report: RwLock<Option<ScrapeReport>>,
}

impl CrossProcessAggregator {
    pub fn new(sources: Vec<Box<dyn RegistrySource>>, stale_after: Duration) -> Self {
        Self {
            sources,
            shards: DashMap::new(),
            stale_after,
            last_report: RwLock::new(None),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn cached_shards(&self) -> usize {
        self.shards.len()
    }

    pub async fn last_report(&self) -> Option<ScrapeReport> {
        self.last_report.read().await.clone()
    }

    /// Run one pass: discover, read concurrently, refresh the cache, evict
    /// expired shards and merge.
    pub async fn scrape(&self) -> ScrapeOutcome {
        let started = Instant::now();
        let mut failed = Vec::new();

        let mut pending = Vec::new();
        for source in &self.sources {
            match source.discover().await {
                Ok(locations) => {
                    for location in locations {
                        pending.push((source.as_ref(), location));
                    }
                }
                Err(error) => {
                    warn!("discovery failed for {}: {}", source.name(), error);
                    failed.push(FailedShard {
                        source: source.name(),
                        location: String::new(),
                        error: error.to_string(),
                    });
                }
            }
        }

        let reads = join_all(pending.iter().map(|(source, location)| async move {
            (
                source.name(),
                source.gauge_max_age(),
                location.clone(),
                source.read(location).await,
            )
        }))
        .await;

        let now = Instant::now();
        // process_id -> (captured_at, gauges still live)
        let mut fresh_ids: HashMap<String, (DateTime<Utc>, bool)> = HashMap::new();

        for (source, gauge_max_age, location, result) in reads {
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    warn!("skipping shard {} from {}: {}", location, source, error);
                    failed.push(FailedShard {
                        source,
                        location,
                        error: error.to_string(),
                    });
                    continue;
                }
            };

            // The same process reachable through two sources: keep the newer.
            if let Some((seen, _)) = fresh_ids.get(&snapshot.process_id) {
                if *seen >= snapshot.captured_at {
                    continue;
                }
            }
            let live = gauge_max_age.map_or(true, |max_age| snapshot_age(&snapshot) <= max_age);
            if !live {
                debug!(
                    "shard {} captured at {} is too old for its gauges to count",
                    location, snapshot.captured_at
                );
            }
            fresh_ids.insert(snapshot.process_id.clone(), (snapshot.captured_at, live));
            self.shards.insert(
                snapshot.process_id.clone(),
                CachedShard {
                    snapshot,
                    origin: location,
                    last_success: now,
                },
            );
        }

        let mut evicted = Vec::new();
        self.shards.retain(|process_id, shard| {
            let keep = fresh_ids.contains_key(process_id)
                || now.duration_since(shard.last_success) <= self.stale_after;
            if !keep {
                evicted.push(process_id.clone());
            }
            keep
        });
        for process_id in &evicted {
            info!("evicted shard {} after {:?} without a successful read", process_id, self.stale_after);
        }

        let mut cached: Vec<(RegistrySnapshot, bool, ShardStatus)> = self
            .shards
            .iter()
            .map(|entry| {
                let shard = entry.value();
                let status = ShardStatus {
                    process_id: shard.snapshot.process_id.clone(),
                    pid: shard.snapshot.pid,
                    origin: shard.origin.clone(),
                    captured_at: shard.snapshot.captured_at,
                    age_secs: now.duration_since(shard.last_success).as_secs_f64(),
                };
                (
                    shard.snapshot.clone(),
                    fresh_ids.get(entry.key()).map_or(false, |(_, live)| *live),
                    status,
                )
            })
            .collect();
        cached.sort_by(|a, b| a.0.process_id.cmp(&b.0.process_id));

        let views: Vec<ShardView<'_>> = cached
            .iter()
            .map(|(snapshot, fresh, _)| ShardView {
                snapshot,
                fresh: *fresh,
            })
            .collect();
        let families = merge(&views);

        let (fresh, retained): (Vec<_>, Vec<_>) =
            cached.into_iter().partition(|(_, fresh, _)| *fresh);
        let report = ScrapeReport {
            scraped_at: Utc::now(),
            fresh: fresh.into_iter().map(|(_, _, status)| status).collect(),
            retained: retained.into_iter().map(|(_, _, status)| status).collect(),
            failed,
            evicted,
        };

        debug!(
            "scrape finished in {:?}: {} fresh, {} retained, {} failed, {} evicted",
            started.elapsed(),
            report.fresh.len(),
            report.retained.len(),
            report.failed.len(),
            report.evicted.len()
        );
        *self.last_report.write().await = Some(report.clone());

        ScrapeOutcome { families, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::catalog::{self, preregister_worker_series, register_all, test_series_labels};
    use crate::registry::{labels, MetricsRegistry};
    use crate::source::{publish_shard, DirectoryRegistrySource, SourceError, SourceResult};

    /// Serves whatever the test puts in; a missing entry reads as an outage.
    struct StaticSource {
        shards: Mutex<BTreeMap<String, Result<RegistrySnapshot, String>>>,
    }

    impl StaticSource {
        fn new() -> Self {
            Self {
                shards: Mutex::new(BTreeMap::new()),
            }
        }

        fn put(&self, location: &str, shard: Result<RegistrySnapshot, String>) {
            self.shards
                .lock()
                .expect("lock")
                .insert(location.to_string(), shard);
        }
    }

    #[async_trait]
    impl RegistrySource for Arc<StaticSource> {
        fn name(&self) -> String {
            "static".to_string()
        }

        async fn discover(&self) -> SourceResult<Vec<String>> {
            Ok(self.shards.lock().expect("lock").keys().cloned().collect())
        }

        async fn read(&self, location: &str) -> SourceResult<RegistrySnapshot> {
            match self.shards.lock().expect("lock").get(location) {
                Some(Ok(snapshot)) => Ok(snapshot.clone()),
                Some(Err(reason)) => Err(SourceError::Invalid {
                    location: location.to_string(),
                    reason: reason.clone(),
                }),
                None => Err(SourceError::Status {
                    target: location.to_string(),
                    status: 503,
                }),
            }
        }
    }

    fn boxed(source: &Arc<StaticSource>) -> Vec<Box<dyn RegistrySource>> {
        vec![Box::new(Arc::clone(source))]
    }

    fn worker(process_id: &str, active: f64, prompt_tokens: f64) -> RegistrySnapshot {
        let registry = MetricsRegistry::with_process_id(process_id);
        register_all(&registry).expect("register");
        let series = test_series_labels();
        registry
            .add(catalog::ACTIVE_CONVERSATIONS, &series.agent(), active)
            .expect("active");
        registry
            .inc(catalog::LLM_TOKENS_TOTAL, &series.llm_tokens("prompt"), prompt_tokens)
            .expect("tokens");
        registry.snapshot()
    }

    fn value(families: &[FamilySnapshot], name: &str, labels: &Labels) -> Option<f64> {
        families
            .iter()
            .find(|family| family.name == name)
            .and_then(|family| family.value(labels))
    }

    #[test]
    fn test_merge_sums_counters_and_latest_gauges() {
        let a = worker("proc-a", 1.0, 10.0);
        let b = worker("proc-b", 1.0, 15.0);
        let series = test_series_labels();

        let families = merge(&[
            ShardView { snapshot: &a, fresh: true },
            ShardView { snapshot: &b, fresh: true },
        ]);

        assert_eq!(
            value(&families, catalog::ACTIVE_CONVERSATIONS, &series.agent()),
            Some(2.0)
        );
        assert_eq!(
            value(&families, catalog::LLM_TOKENS_TOTAL, &series.llm_tokens("prompt")),
            Some(25.0)
        );
    }

    #[test]
    fn test_merge_last_write_wins_takes_newest_sample() {
        let series = test_series_labels();
        let older = MetricsRegistry::with_process_id("proc-a");
        register_all(&older).expect("register");
        older
            .set(catalog::EOU_DELAY_MS, &series.agent(), 300.0)
            .expect("set");
        let older = older.snapshot();
        std::thread::sleep(Duration::from_millis(2));

        let newer = MetricsRegistry::with_process_id("proc-b");
        register_all(&newer).expect("register");
        newer
            .set(catalog::EOU_DELAY_MS, &series.agent(), 120.0)
            .expect("set");
        let newer = newer.snapshot();

        for shards in [[&older, &newer], [&newer, &older]] {
            let views: Vec<ShardView<'_>> = shards
                .iter()
                .map(|snapshot| ShardView { snapshot, fresh: true })
                .collect();
            assert_eq!(
                value(&merge(&views), catalog::EOU_DELAY_MS, &series.agent()),
                Some(120.0)
            );
        }
    }

    #[test]
    fn test_merge_last_write_wins_ignores_newer_placeholder() {
        let series = test_series_labels();
        let busy = MetricsRegistry::with_process_id("proc-busy");
        register_all(&busy).expect("register");
        preregister_worker_series(&busy, &series).expect("preregister");
        busy.set(catalog::TOTAL_CONVERSATION_LATENCY_MS, &series.agent(), 875.0)
            .expect("set");
        let busy = busy.snapshot();
        std::thread::sleep(Duration::from_millis(5));

        let idle = MetricsRegistry::with_process_id("proc-idle");
        register_all(&idle).expect("register");
        preregister_worker_series(&idle, &series).expect("preregister");
        let idle = idle.snapshot();

        for shards in [[&busy, &idle], [&idle, &busy]] {
            let views: Vec<ShardView<'_>> = shards
                .iter()
                .map(|snapshot| ShardView { snapshot, fresh: true })
                .collect();
            assert_eq!(
                value(&merge(&views), catalog::TOTAL_CONVERSATION_LATENCY_MS, &series.agent()),
                Some(875.0)
            );
        }

        let only_idle = merge(&[ShardView { snapshot: &idle, fresh: true }]);
        assert_eq!(
            value(&only_idle, catalog::TOTAL_CONVERSATION_LATENCY_MS, &series.agent()),
            Some(0.0)
        );
    }

    #[test]
    fn test_merge_drops_conflicting_family_declaration() {
        let a = worker("proc-a", 0.0, 4.0);
        let mut b = worker("proc-b", 0.0, 6.0);
        for family in &mut b.families {
            if family.name == catalog::LLM_TOKENS_TOTAL {
                family.label_names = vec!["model".to_string()];
                for sample in &mut family.samples {
                    sample.labels.remove("type");
                }
            }
        }

        let families = merge(&[
            ShardView { snapshot: &a, fresh: true },
            ShardView { snapshot: &b, fresh: true },
        ]);
        assert_eq!(
            value(
                &families,
                catalog::LLM_TOKENS_TOTAL,
                &test_series_labels().llm_tokens("prompt")
            ),
            Some(4.0)
        );
        assert_eq!(
            value(
                &families,
                catalog::LLM_TOKENS_TOTAL,
                &labels(&[("model", "openai-gpt-4o")])
            ),
            None
        );
    }

    #[tokio::test]
    async fn test_corrupt_shard_does_not_abort_scrape() {
        let source = Arc::new(StaticSource::new());
        source.put("a", Ok(worker("proc-a", 1.0, 10.0)));
        source.put("b", Err("truncated json".to_string()));
        source.put("c", Ok(worker("proc-c", 1.0, 15.0)));

        let aggregator = CrossProcessAggregator::new(boxed(&source), DEFAULT_STALE_AFTER);
        let outcome = aggregator.scrape().await;
        let series = test_series_labels();

        assert_eq!(outcome.report.fresh.len(), 2);
        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.report.failed[0].location, "b");
        assert_eq!(
            value(&outcome.families, catalog::LLM_TOKENS_TOTAL, &series.llm_tokens("prompt")),
            Some(25.0)
        );
        assert_eq!(
            value(&outcome.families, catalog::ACTIVE_CONVERSATIONS, &series.agent()),
            Some(2.0)
        );
        assert_eq!(aggregator.last_report().await, Some(outcome.report));
    }

    #[tokio::test]
    async fn test_unreachable_shard_keeps_counters_but_not_gauges() {
        let source = Arc::new(StaticSource::new());
        source.put("a", Ok(worker("proc-a", 1.0, 10.0)));
        source.put("b", Ok(worker("proc-b", 1.0, 15.0)));

        let aggregator = CrossProcessAggregator::new(boxed(&source), DEFAULT_STALE_AFTER);
        aggregator.scrape().await;

        source.put("b", Err("connection refused".to_string()));
        let outcome = aggregator.scrape().await;
        let series = test_series_labels();

        assert_eq!(outcome.report.retained.len(), 1);
        assert_eq!(outcome.report.retained[0].process_id, "proc-b");
        assert_eq!(
            value(&outcome.families, catalog::LLM_TOKENS_TOTAL, &series.llm_tokens("prompt")),
            Some(25.0)
        );
        assert_eq!(
            value(&outcome.families, catalog::ACTIVE_CONVERSATIONS, &series.agent()),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_shard_evicted_after_ttl() {
        let source = Arc::new(StaticSource::new());
        source.put("a", Ok(worker("proc-a", 1.0, 10.0)));
        source.put("b", Ok(worker("proc-b", 1.0, 15.0)));

        let aggregator = CrossProcessAggregator::new(boxed(&source), Duration::ZERO);
        aggregator.scrape().await;
        assert_eq!(aggregator.cached_shards(), 2);

        tokio::time::sleep(Duration::from_millis(5)).await;
        source.put("b", Err("gone".to_string()));
        let outcome = aggregator.scrape().await;

        assert_eq!(outcome.report.evicted, vec!["proc-b".to_string()]);
        assert_eq!(aggregator.cached_shards(), 1);
        assert_eq!(
            value(
                &outcome.families,
                catalog::LLM_TOKENS_TOTAL,
                &test_series_labels().llm_tokens("prompt")
            ),
            Some(10.0)
        );
    }

    #[tokio::test]
    async fn test_old_shard_file_keeps_counters_but_not_gauges() {
        let dir = tempfile::tempdir().expect("tempdir");
        publish_shard(dir.path(), &worker("proc-a", 1.0, 10.0))
            .await
            .expect("publish");
        let mut killed = worker("proc-b", 1.0, 15.0);
        killed.captured_at = Utc::now() - chrono::Duration::seconds(120);
        publish_shard(dir.path(), &killed).await.expect("publish");

        let source = DirectoryRegistrySource::new(dir.path())
            .with_max_age(DEFAULT_STALE_AFTER)
            .with_gauge_max_age(Duration::from_secs(45));
        let sources: Vec<Box<dyn RegistrySource>> = vec![Box::new(source)];
        let aggregator = CrossProcessAggregator::new(sources, DEFAULT_STALE_AFTER);
        let outcome = aggregator.scrape().await;
        let series = test_series_labels();

        assert_eq!(outcome.report.fresh.len(), 1);
        assert_eq!(outcome.report.fresh[0].process_id, "proc-a");
        assert_eq!(outcome.report.retained.len(), 1);
        assert_eq!(outcome.report.retained[0].process_id, "proc-b");
        assert_eq!(
            value(&outcome.families, catalog::LLM_TOKENS_TOTAL, &series.llm_tokens("prompt")),
            Some(25.0)
        );
        assert_eq!(
            value(&outcome.families, catalog::ACTIVE_CONVERSATIONS, &series.agent()),
            Some(1.0)
        );
    }
}
