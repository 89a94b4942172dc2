use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use voice_metrics::catalog::{preregister_worker_series, register_all};
use voice_metrics::{log_record, MetricsRegistry};

use agent_worker::ingest::spawn_stdin_reader;
use agent_worker::logging::init_logging;
use agent_worker::session::shutdown_signal;
use agent_worker::{
    spawn_registry_server, AppConfig, EventIngest, ExitHooks, ProviderPlugins, SessionRuntime,
    SnapshotPublisher,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "agent-worker")]
#[command(about = "Voice agent worker: session metrics and per-process registry")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// TOML configuration file
    #[arg(long, env = "AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Agent type label, overrides the config file
    #[arg(long)]
    agent_type: Option<String>,

    /// Room the session joins
    #[arg(long, env = "ROOM_NAME", default_value = "console")]
    room: String,

    /// Registry endpoint port, overrides the config file
    #[arg(long, env = "REGISTRY_PORT")]
    port: Option<u16>,

    /// Shared registry directory, overrides the config file
    #[arg(long)]
    publish_dir: Option<PathBuf>,

    /// Capacity of the session's metrics bus
    #[arg(long, env = "METRICS_BUS_CAPACITY", default_value = "1024")]
    bus_capacity: usize,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(agent_type) = cli.agent_type {
        config.agent_type = agent_type;
    }
    if let Some(port) = cli.port {
        config.registry.listen_port = port;
    }
    if let Some(dir) = cli.publish_dir {
        config.registry.publish_dir = Some(dir);
    }
    config.validate()?;
    log_record("Loaded application config", &config);

    let plugins = ProviderPlugins::build(&config)?;
    log::info!(
        "Providers: llm={} fast_llm={} stt={} tts={}",
        plugins.primary_llm.provider.as_str(),
        plugins.fast_llm.provider.as_str(),
        plugins.stt.provider.as_str(),
        plugins.tts.provider.as_str()
    );

    let series = config.series_labels();
    let registry = Arc::new(MetricsRegistry::new());
    register_all(&registry)?;
    preregister_worker_series(&registry, &series)?;
    log::info!("Registry initialised for process {}", registry.process_id());

    let (server, server_task) = spawn_registry_server(
        Arc::clone(&registry),
        &config.agent_type,
        config.registry.listen_port,
    )?;

    let publisher = config.registry.publish_dir.clone().map(|dir| {
        Arc::new(SnapshotPublisher::new(
            Arc::clone(&registry),
            dir,
            Duration::from_secs(config.registry.publish_interval_secs),
        ))
    });
    let publish_task = publisher.as_ref().map(|publisher| Arc::clone(publisher).spawn());

    let session = SessionRuntime::start(
        Arc::clone(&registry),
        series.clone(),
        cli.room,
        config.cost_estimator(),
        cli.bus_capacity,
    )?;

    let hooks = ExitHooks::new();
    let guard = session.guard();
    hooks.register(move || {
        guard.release();
    });

    let ingest = EventIngest::new(session.bus(), Arc::clone(&registry), series);
    tokio::select! {
        stats = ingest.run_channel(spawn_stdin_reader(cli.bus_capacity)) => {
            log::info!("Pipeline finished after {} events", stats.events);
        }
        signal = shutdown_signal() => {
            log::info!("Received {}, shutting down", signal);
        }
    }

    let summary = session.finish().await;
    hooks.run();
    if let Some(task) = publish_task {
        task.abort();
    }
    if let Some(publisher) = &publisher {
        match publisher.publish_once().await {
            Ok(path) => log::info!("Final registry snapshot written to {}", path.display()),
            Err(error) => log::warn!("Failed to write final registry snapshot: {}", error),
        }
    }
    server.stop(true).await;
    server_task.await??;

    let summary = summary?;
    log::info!(
        "Session in room {} finished: {} turns, total cost {:.6}",
        summary.room,
        summary.turns,
        summary.total_cost
    );
    Ok(())
}
