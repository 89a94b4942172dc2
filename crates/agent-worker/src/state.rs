use std::sync::Arc;

use chrono::{DateTime, Utc};
use voice_metrics::MetricsRegistry;

pub struct AppState {
    pub registry: Arc<MetricsRegistry>,
    pub agent_type: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<MetricsRegistry>, agent_type: impl Into<String>) -> Self {
        Self {
            registry,
            agent_type: agent_type.into(),
            started_at: Utc::now(),
        }
    }
}
