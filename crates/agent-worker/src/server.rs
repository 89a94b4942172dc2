use std::sync::Arc;

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use tokio::task::JoinHandle;
use voice_metrics::MetricsRegistry;

use crate::handlers;
use crate::state::AppState;

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/registry", web::get().to(handlers::registry))
        .route("/metrics", web::get().to(handlers::metrics))
        .route("/health", web::get().to(handlers::health));
}

/// Bind the registry endpoint and run it in the background.
pub fn spawn_registry_server(
    registry: Arc<MetricsRegistry>,
    agent_type: &str,
    port: u16,
) -> std::io::Result<(ServerHandle, JoinHandle<std::io::Result<()>>)> {
    let state = web::Data::new(AppState::new(registry, agent_type));
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(app_config))
        .workers(1)
        .disable_signals()
        .bind(("0.0.0.0", port))?
        .run();

    log::info!("Registry endpoint listening on port {}", port);
    let handle = server.handle();
    Ok((handle, actix_web::rt::spawn(server)))
}
