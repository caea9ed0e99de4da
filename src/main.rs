use actix_web::{web, App, HttpServer};
use catalog_scraper::app_state::AppState;
use catalog_scraper::browser::{BrowserBackend, BrowserManager};
use catalog_scraper::config::Config;
use catalog_scraper::sources::SourceRegistry;
use catalog_scraper::{router, scheduler};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::io;
use std::sync::Arc;

fn init_logging() {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
            )))
            .build();
        let config = log4rs::Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info));

        match config {
            Ok(config) => {
                if log4rs::init_config(config).is_ok() {
                    log::warn!("log4rs.yml not loaded ({}), logging to console", e);
                }
            }
            Err(e) => eprintln!("Logging unavailable: {}", e),
        }
    }
}

fn to_io(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    init_logging();

    let cfg = Config::load();
    cfg.validate().map_err(to_io)?;

    log::info!("Cache: {} entries, {}s TTL", cfg.cache.max_entries, cfg.cache.ttl_seconds);
    log::info!("Upstream: {}", cfg.upstream.base_url);
    if cfg.upstream.api_key.is_empty() {
        log::warn!("No upstream API key configured");
    }

    // Chrome is only launched when some category scrapes
    let browser: Option<Arc<dyn BrowserBackend>> = if cfg.uses_browser() {
        let manager = BrowserManager::new(cfg.browser.clone()).map_err(to_io)?;
        Some(Arc::new(manager))
    } else {
        None
    };

    let sources = SourceRegistry::from_config(&cfg, browser).map_err(to_io)?;
    let bind = cfg.server.bind.clone();
    let data = web::Data::new(AppState::new(cfg, sources));

    // start background cache sweeper
    scheduler::spawn(data.clone());

    log::info!("Listening on {}", bind);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(router::configure)
    })
    .bind(&bind)?
    .run()
    .await
}
