use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;

use crate::state::AppState;

pub async fn handler(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "cached_shards": state.aggregator.cached_shards(),
        "stale_after_secs": state.aggregator.stale_after().as_secs(),
    }))
}
