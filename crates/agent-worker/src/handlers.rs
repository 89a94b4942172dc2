use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use voice_metrics::exposition;

use crate::state::AppState;

/// This process's registry snapshot, pulled by the aggregator.
pub async fn registry(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.registry.snapshot())
}

/// This process's series alone, for debugging a single worker.
pub async fn metrics(state: web::Data<AppState>) -> impl Responder {
    match exposition::render(&state.registry.snapshot().families) {
        Ok(body) => HttpResponse::Ok()
            .content_type(exposition::content_type())
            .body(body),
        Err(error) => {
            log::error!("Failed to encode metrics: {}", error);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to encode metrics",
                "details": error.to_string(),
            }))
        }
    }
}

pub async fn health(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "process_id": state.registry.process_id(),
        "agent_type": state.agent_type,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}
