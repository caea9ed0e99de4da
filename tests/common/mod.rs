//! In-process stand-in for the upstream metadata API

#![allow(dead_code)]

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const API_KEY: &str = "test-key";
pub const IMAGE_PREFIX: &str = "https://images.test/w500";

pub struct FakeUpstream {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    handle: ServerHandle,
}

impl FakeUpstream {
    /// Requests the server has answered so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

type Query = web::Query<HashMap<String, String>>;

fn requested_page(query: &Query) -> i64 {
    query.get("page").and_then(|p| p.parse().ok()).unwrap_or(0)
}

fn unauthorized(query: &Query) -> Option<HttpResponse> {
    if query.get("api_key").map(String::as_str) == Some(API_KEY) {
        None
    } else {
        Some(HttpResponse::Unauthorized().json(json!({"status_message": "Invalid API key"})))
    }
}

async fn movies(hits: web::Data<AtomicUsize>, query: Query) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    if let Some(denied) = unauthorized(&query) {
        return denied;
    }
    let page = requested_page(&query);
    HttpResponse::Ok().json(json!({
        "page": page,
        "results": [
            {"id": 1000 + page, "title": "Fight Club", "release_date": "1999-10-15", "poster_path": "/fight.jpg"},
            {"id": 2000 + page, "title": "Untitled Project", "release_date": "", "poster_path": null},
            {"title": "No identifier"}
        ]
    }))
}

async fn tv(hits: web::Data<AtomicUsize>, query: Query) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    if let Some(denied) = unauthorized(&query) {
        return denied;
    }
    // Slow enough for concurrent callers to overlap
    actix_web::rt::time::sleep(Duration::from_millis(150)).await;
    let page = requested_page(&query);
    HttpResponse::Ok().json(json!({
        "page": page,
        "results": [
            {"id": 3000 + page, "name": "Dark", "first_air_date": "2017-12-01", "poster_path": "/dark.jpg"}
        ]
    }))
}

async fn broken(hits: web::Data<AtomicUsize>) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    HttpResponse::InternalServerError().body("upstream exploded")
}

async fn shapeless(hits: web::Data<AtomicUsize>) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    HttpResponse::Ok().json(json!({"page": 1, "total_results": 0}))
}

pub async fn start() -> FakeUpstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = web::Data::from(hits.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(counter.clone())
            .route("/trending/movie/day", web::get().to(movies))
            .route("/trending/tv/day", web::get().to(tv))
            .route("/broken/day", web::get().to(broken))
            .route("/shapeless/day", web::get().to(shapeless))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("bind fake upstream");

    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);

    FakeUpstream {
        base_url: format!("http://{}", addr),
        hits,
        handle,
    }
}
