//! HTTP surface
//!
//! `GET /api/{category}?page=N` answers from the cache, loading through the
//! category's source on a miss. Failures are logged with their kind and
//! reach the client only as a generic message.

use crate::app_state::AppState;
use crate::cache::LoadResult;
use crate::error::SourceError;
use crate::models::CacheKey;
use actix_web::{get, web, HttpResponse, Responder};
use log::error;
use std::collections::HashMap;
use std::time::Instant;

/// Page number from the query string; anything missing or unusable is 1
pub fn parse_page(raw: Option<&str>) -> u32 {
    raw.and_then(|p| p.trim().parse::<u32>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1)
}

/// Cached page for `category`, loading and normalizing it on a miss
pub async fn load_page(state: &AppState, category: &str, page: u32) -> LoadResult {
    let source = state
        .sources
        .get(category)
        .cloned()
        .ok_or_else(|| SourceError::UnknownCategory(category.to_string()))?;

    let normalizer = state.normalizer.clone();
    let metrics = state.metrics.clone();
    let name = category.to_string();

    state
        .cache
        .get_or_load(CacheKey::new(category, page), move || async move {
            let started = Instant::now();
            let result = source
                .fetch(page)
                .await
                .map(|raw| normalizer.normalize(raw));

            match &result {
                Ok(items) => metrics.record_success(&name, started.elapsed(), items.len()),
                Err(e) => metrics.record_failure(&name, e),
            }
            result
        })
        .await
}

#[get("/api/{category}")]
async fn get_category(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
) -> impl Responder {
    let category = path.into_inner();
    let page = parse_page(query.get("page").map(String::as_str));

    match load_page(&data, &category, page).await {
        Ok(items) => HttpResponse::Ok().json(items.as_ref()),
        Err(SourceError::UnknownCategory(_)) => {
            HttpResponse::NotFound().json(serde_json::json!({"error": "Unknown category"}))
        }
        Err(e) => {
            error!(
                "Failed to fetch {} page {} [{}]: {}",
                category,
                page,
                e.kind(),
                e
            );
            HttpResponse::InternalServerError()
                .json(serde_json::json!({"error": format!("Failed to fetch {}", category)}))
        }
    }
}

#[get("/metrics")]
async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    let metrics_json: Vec<serde_json::Value> = data
        .metrics
        .get_all_metrics()
        .iter()
        .map(|m| {
            serde_json::json!({
                "source_name": m.source_name,
                "success_rate": format!("{:.2}%", m.success_rate()),
                "total_requests": m.total_requests,
                "successful_requests": m.successful_requests,
                "failed_requests": m.failed_requests,
                "average_response_time_ms": format!("{:.2}", m.average_response_time_ms),
                "items_served": m.items_served,
                "errors_by_kind": m.errors_by_kind,
                "last_success": m.last_success,
                "last_failure": m.last_failure,
                "last_error": m.last_error,
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "metrics": metrics_json,
        "cache": data.cache.stats(),
        "categories": data.sources.categories().collect::<Vec<_>>(),
    }))
}

/// Register every route on an app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_category).service(get_metrics);
}
