//! Where the aggregator finds per-process registry snapshots.
//!
//! Two sources exist: pulling `GET {target}/registry` from each worker over
//! HTTP, and reading `<process_id>.json` shard files from a shared directory
//! that workers publish into.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use crate::snapshot::RegistrySnapshot;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {target} failed: {source}")]
    Http {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{target} answered with status {status}")]
    Status { target: String, status: u16 },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shard {location} is not a registry snapshot: {source}")]
    Decode {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("shard {location} rejected: {reason}")]
    Invalid { location: String, reason: String },

    #[error("shard {location} was captured at {captured_at}, past the staleness window")]
    Stale {
        location: String,
        captured_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A set of shards the aggregator can enumerate and read.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Human readable name used in logs and the scrape report.
    fn name(&self) -> String;

    /// List the shards currently available. Locations are opaque to the
    /// aggregator and only passed back into `read`.
    async fn discover(&self) -> SourceResult<Vec<String>>;

    /// Read and validate one shard.
    async fn read(&self, location: &str) -> SourceResult<RegistrySnapshot>;

    /// How old a shard's `captured_at` may be for its gauges to still count
    /// as live. `None` when every successful read is live, as with a pull.
    fn gauge_max_age(&self) -> Option<Duration> {
        None
    }
}

/// Pull model: every target is one worker's registry endpoint.
pub struct HttpRegistrySource {
    client: reqwest::Client,
    targets: Vec<String>,
}

impl HttpRegistrySource {
    pub fn new(targets: Vec<String>, timeout: Duration) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::Client)?;
        Ok(Self::with_client(client, targets))
    }

    pub fn with_client(client: reqwest::Client, targets: Vec<String>) -> Self {
        let targets = targets
            .into_iter()
            .map(|target| target.trim_end_matches('/').to_string())
            .collect();
        Self { client, targets }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    fn name(&self) -> String {
        format!("http({} targets)", self.targets.len())
    }

    async fn discover(&self) -> SourceResult<Vec<String>> {
        Ok(self.targets.clone())
    }

    async fn read(&self, location: &str) -> SourceResult<RegistrySnapshot> {
        let url = format!("{}/registry", location);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| SourceError::Http {
                target: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                target: url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| SourceError::Http {
            target: url.clone(),
            source,
        })?;
        decode_shard(&url, &body)
    }
}

/// Shared-volume model: each worker atomically rewrites its own shard file.
///
/// Files outlive the worker that wrote them, so a shard captured longer ago
/// than `max_age` reads as stale instead of as live state. A shard older
/// than `gauge_max_age` still reads, but only its counters are merged.
pub struct DirectoryRegistrySource {
    dir: PathBuf,
    max_age: Option<Duration>,
    gauge_max_age: Option<Duration>,
}

impl DirectoryRegistrySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: None,
            gauge_max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Usually a small multiple of the workers' publish interval.
    pub fn with_gauge_max_age(mut self, gauge_max_age: Duration) -> Self {
        self.gauge_max_age = Some(gauge_max_age);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RegistrySource for DirectoryRegistrySource {
    fn name(&self) -> String {
        format!("dir({})", self.dir.display())
    }

    async fn discover(&self) -> SourceResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| io_error(&self.dir, source))?;

        let mut shards = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&self.dir, source))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                shards.push(path.to_string_lossy().into_owned());
            }
        }
        shards.sort();
        debug!("discovered {} shard files in {}", shards.len(), self.dir.display());
        Ok(shards)
    }

    async fn read(&self, location: &str) -> SourceResult<RegistrySnapshot> {
        let bytes = tokio::fs::read(location)
            .await
            .map_err(|source| io_error(Path::new(location), source))?;
        let snapshot = decode_shard(location, &bytes)?;

        if let Some(max_age) = self.max_age {
            if snapshot_age(&snapshot) > max_age {
                return Err(SourceError::Stale {
                    location: location.to_string(),
                    captured_at: snapshot.captured_at,
                });
            }
        }
        Ok(snapshot)
    }

    fn gauge_max_age(&self) -> Option<Duration> {
        self.gauge_max_age
    }
}

/// Time since the snapshot was captured; zero for a capture in the future.
pub fn snapshot_age(snapshot: &RegistrySnapshot) -> Duration {
    (chrono::Utc::now() - snapshot.captured_at)
        .to_std()
        .unwrap_or_default()
}

/// Write `snapshot` as `<dir>/<process_id>.json`.
///
/// The file is written under a temporary name and renamed into place so a
/// concurrent reader sees either the previous or the new shard, never a
/// partial one.
pub async fn publish_shard(dir: &Path, snapshot: &RegistrySnapshot) -> SourceResult<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| io_error(dir, source))?;

    let target = shard_path(dir, &snapshot.process_id);
    let tmp = dir.join(format!(".{}.json.tmp", snapshot.process_id));
    let body = serde_json::to_vec(snapshot).map_err(|source| SourceError::Decode {
        location: target.to_string_lossy().into_owned(),
        source,
    })?;

    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|source| io_error(&tmp, source))?;
    tokio::fs::rename(&tmp, &target)
        .await
        .map_err(|source| io_error(&target, source))?;
    Ok(target)
}

pub fn shard_path(dir: &Path, process_id: &str) -> PathBuf {
    dir.join(format!("{}.json", process_id))
}

fn decode_shard(location: &str, bytes: &[u8]) -> SourceResult<RegistrySnapshot> {
    let snapshot: RegistrySnapshot =
        serde_json::from_slice(bytes).map_err(|source| SourceError::Decode {
            location: location.to_string(),
            source,
        })?;
    snapshot.validate().map_err(|reason| SourceError::Invalid {
        location: location.to_string(),
        reason,
    })?;
    Ok(snapshot)
}

fn io_error(path: &Path, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.display().to_string(),
        source,
    }
}
