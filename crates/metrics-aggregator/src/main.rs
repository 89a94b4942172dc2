use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use metrics_aggregator::logging::init_logging;
use metrics_aggregator::{run_server, AggregatorConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "metrics-aggregator")]
#[command(about = "Merges voice agent worker registries into one Prometheus endpoint")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Server port
    #[arg(long, env = "METRICS_PORT", default_value = "9100")]
    port: u16,

    /// Bind address
    #[arg(long, env = "METRICS_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Worker base URL serving /registry; repeat for every worker
    #[arg(long = "target", env = "METRICS_TARGETS", value_delimiter = ',')]
    targets: Vec<String>,

    /// Shared directory workers publish registry snapshots into
    #[arg(long, env = "METRICS_REGISTRY_DIR")]
    registry_dir: Option<PathBuf>,

    /// Forget a worker this long after its last successful read
    #[arg(long, env = "METRICS_STALE_AFTER_SECS", default_value = "300")]
    stale_after_secs: u64,

    /// Age past which a shard file's gauges stop counting; a few publish
    /// intervals of the workers
    #[arg(long, env = "METRICS_GAUGE_MAX_AGE_SECS", default_value = "45")]
    gauge_max_age_secs: u64,

    /// Per-request timeout when pulling a worker registry
    #[arg(long, env = "METRICS_TIMEOUT_MS", default_value = "2000")]
    timeout_ms: u64,

    /// Background scrape period, 0 to scrape only on request
    #[arg(long, env = "METRICS_SCRAPE_INTERVAL_SECS", default_value = "15")]
    scrape_interval_secs: u64,
}

impl From<Cli> for AggregatorConfig {
    fn from(cli: Cli) -> Self {
        Self {
            bind: cli.bind,
            port: cli.port,
            targets: cli.targets,
            registry_dir: cli.registry_dir,
            stale_after: Duration::from_secs(cli.stale_after_secs),
            gauge_max_age: Duration::from_secs(cli.gauge_max_age_secs),
            timeout: Duration::from_millis(cli.timeout_ms),
            scrape_interval: (cli.scrape_interval_secs > 0)
                .then(|| Duration::from_secs(cli.scrape_interval_secs)),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    log::info!("Starting metrics aggregator on {}:{}", cli.bind, cli.port);
    if cli.debug {
        log::debug!("Targets: {:?}", cli.targets);
        log::debug!("Registry directory: {:?}", cli.registry_dir);
    }

    run_server(cli.into()).await
}
