use actix_web::{web, HttpResponse, Responder};

use crate::state::AppState;

/// Report of the latest scrape; runs one if nothing has been scraped yet.
pub async fn handler(state: web::Data<AppState>) -> impl Responder {
    let report = match state.aggregator.last_report().await {
        Some(report) => report,
        None => state.aggregator.scrape().await.report,
    };
    HttpResponse::Ok().json(report)
}
