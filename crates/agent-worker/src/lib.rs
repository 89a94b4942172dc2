//! Composition root of one voice agent worker process: configuration,
//! provider selection, session lifecycle and the registry endpoint the
//! aggregator pulls from.

pub mod config;
pub mod handlers;
pub mod ingest;
pub mod logging;
pub mod providers;
pub mod publisher;
pub mod server;
pub mod session;
pub mod state;

pub use config::{AppConfig, ConfigError, ConfigResult};
pub use ingest::{EventIngest, IngestStats};
pub use providers::ProviderPlugins;
pub use publisher::SnapshotPublisher;
pub use server::{app_config, spawn_registry_server};
pub use session::{ActiveSessionGuard, ExitHooks, SessionError, SessionRuntime};
pub use state::AppState;
