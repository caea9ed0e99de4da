// Library interface for catalog_scraper
// The binary and the integration tests both build on these modules

pub mod app_state;
pub mod browser;
pub mod cache;
pub mod config;
pub mod error;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod router;
pub mod scheduler;
pub mod sources;
pub mod stealth;
