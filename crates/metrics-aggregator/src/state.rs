use std::sync::Arc;

use chrono::{DateTime, Utc};
use voice_metrics::CrossProcessAggregator;

pub struct AppState {
    pub aggregator: Arc<CrossProcessAggregator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(aggregator: Arc<CrossProcessAggregator>) -> Self {
        Self {
            aggregator,
            started_at: Utc::now(),
        }
    }
}
