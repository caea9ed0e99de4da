//! Application state for the Actix-web server
//!
//! `AppState` is wrapped in `web::Data` and shared by every handler. The
//! cache is the only mutable piece; everything else is read-only after start.

use crate::cache::Cache;
use crate::config::Config;
use crate::metrics::MetricsTracker;
use crate::normalizer::Normalizer;
use crate::sources::SourceRegistry;

pub struct AppState {
    /// Normalized pages keyed by category and page
    pub cache: Cache,
    /// Category name to acquisition source
    pub sources: SourceRegistry,
    pub normalizer: Normalizer,
    /// Per-category load metrics
    pub metrics: MetricsTracker,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, sources: SourceRegistry) -> Self {
        Self {
            cache: Cache::new(config.cache.max_entries, config.cache.ttl()),
            normalizer: Normalizer::new(config.upstream.image_prefix.clone()),
            metrics: MetricsTracker::new(),
            sources,
            config,
        }
    }
}
