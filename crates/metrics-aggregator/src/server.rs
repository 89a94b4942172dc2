use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use voice_metrics::{
    CrossProcessAggregator, DirectoryRegistrySource, HttpRegistrySource, RegistrySource,
    SourceResult,
};

use crate::handlers;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub bind: String,
    pub port: u16,
    /// Worker base URLs, each serving `/registry`.
    pub targets: Vec<String>,
    /// Shared location workers publish shard files into.
    pub registry_dir: Option<PathBuf>,
    pub stale_after: Duration,
    /// Shard files older than this still count for counters, not gauges.
    pub gauge_max_age: Duration,
    pub timeout: Duration,
    /// Background scrape period; `None` scrapes only when `/metrics` is hit.
    pub scrape_interval: Option<Duration>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9100,
            targets: Vec::new(),
            registry_dir: None,
            stale_after: voice_metrics::DEFAULT_STALE_AFTER,
            gauge_max_age: Duration::from_secs(45),
            timeout: Duration::from_millis(2000),
            scrape_interval: Some(Duration::from_secs(15)),
        }
    }
}

pub fn build_sources(config: &AggregatorConfig) -> SourceResult<Vec<Box<dyn RegistrySource>>> {
    let mut sources: Vec<Box<dyn RegistrySource>> = Vec::new();

    if !config.targets.is_empty() {
        sources.push(Box::new(HttpRegistrySource::new(
            config.targets.clone(),
            config.timeout,
        )?));
    }
    if let Some(dir) = &config.registry_dir {
        sources.push(Box::new(
            DirectoryRegistrySource::new(dir.clone())
                .with_max_age(config.stale_after)
                .with_gauge_max_age(config.gauge_max_age),
        ));
    }

    if sources.is_empty() {
        log::warn!("No worker targets or registry directory configured; /metrics will be empty");
    }
    Ok(sources)
}

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(handlers::metrics::handler))
        .route("/health", web::get().to(handlers::health::handler))
        .route("/shards", web::get().to(handlers::shards::handler));
}

pub async fn run_server(config: AggregatorConfig) -> anyhow::Result<()> {
    let sources = build_sources(&config)?;
    log::info!(
        "Aggregating {} source(s), staleness window {:?}",
        sources.len(),
        config.stale_after
    );
    let aggregator = Arc::new(CrossProcessAggregator::new(sources, config.stale_after));

    let scrape_loop = config.scrape_interval.map(|period| {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                aggregator.scrape().await;
            }
        })
    });

    let state = web::Data::new(AppState::new(aggregator));
    let address = format!("{}:{}", config.bind, config.port);
    log::info!("Serving merged metrics on http://{}/metrics", address);

    let result = HttpServer::new(move || App::new().app_data(state.clone()).configure(app_config))
        .bind(&address)?
        .run()
        .await;

    if let Some(handle) = scrape_loop {
        handle.abort();
    }
    result?;
    Ok(())
}
