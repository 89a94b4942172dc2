use actix_web::{web, HttpResponse, Responder};
use voice_metrics::exposition;

use crate::state::AppState;

/// Scrape every worker registry and answer with the merged series.
pub async fn handler(state: web::Data<AppState>) -> impl Responder {
    let outcome = state.aggregator.scrape().await;

    match exposition::render(&outcome.families) {
        Ok(body) => HttpResponse::Ok()
            .content_type(exposition::content_type())
            .body(body),
        Err(error) => {
            log::error!("Failed to encode merged metrics: {}", error);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to encode metrics",
                "details": error.to_string(),
            }))
        }
    }
}
