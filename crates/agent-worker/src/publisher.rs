use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use voice_metrics::{publish_shard, MetricsRegistry, SourceResult};

/// Periodically writes this process's snapshot into the shared registry
/// directory for aggregators that read shard files instead of pulling.
pub struct SnapshotPublisher {
    registry: Arc<MetricsRegistry>,
    dir: PathBuf,
    interval: Duration,
}

impl SnapshotPublisher {
    pub fn new(registry: Arc<MetricsRegistry>, dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            registry,
            dir: dir.into(),
            interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn publish_once(&self) -> SourceResult<PathBuf> {
        publish_shard(&self.dir, &self.registry.snapshot()).await
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                match self.publish_once().await {
                    Ok(path) => log::debug!("Published registry snapshot to {}", path.display()),
                    Err(error) => log::warn!("Failed to publish registry snapshot: {}", error),
                }
            }
        })
    }
}
