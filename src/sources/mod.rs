//! Catalog sources
//!
//! A category is served either by the upstream metadata API ([`ApiAdapter`])
//! or by driving a headless browser against a listing page
//! ([`ScrapeAdapter`]). [`Source`] is the tag the router dispatches on; each
//! variant carries the adapter and the per-category settings it needs.

pub mod api;
pub mod scrape;

pub use api::{ApiAdapter, ApiEndpoint};
pub use scrape::{ScrapeAdapter, ScrapeTarget};

use crate::browser::BrowserBackend;
use crate::config::{Config, SourceConfig};
use crate::error::{ConfigError, SourceError};
use crate::http_client::{build_client, HttpClientConfig};
use crate::models::MediaType;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One result entry as the upstream API returns it
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiRecord {
    pub id: Option<Value>,
    /// Movies carry `title`, TV shows `name`
    pub title: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub poster_path: Option<String>,
    pub media_type: Option<String>,
}

/// One item block lifted from a rendered listing page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapedRecord {
    /// `data-id` attribute, when the markup has one
    pub id_hint: Option<String>,
    pub title: String,
    /// Absolute link to the item's page
    pub link: String,
    pub poster: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Api(ApiRecord),
    Scraped(ScrapedRecord),
}

/// Adapter output before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResult {
    /// Media type of the category the records were fetched for
    pub media_type: MediaType,
    pub records: Vec<RawRecord>,
}

#[derive(Clone)]
pub enum Source {
    Api {
        adapter: Arc<ApiAdapter>,
        endpoint: ApiEndpoint,
    },
    Scrape {
        adapter: Arc<ScrapeAdapter>,
        target: Arc<ScrapeTarget>,
    },
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Api { .. } => "api",
            Source::Scrape { .. } => "scrape",
        }
    }

    pub async fn fetch(&self, page: u32) -> Result<AdapterResult, SourceError> {
        match self {
            Source::Api { adapter, endpoint } => Ok(adapter.fetch(endpoint, page).await?),
            Source::Scrape { adapter, target } => Ok(adapter.fetch(target, page).await?),
        }
    }
}

/// Category name to source
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: impl Into<String>, source: Source) {
        self.sources.insert(category.into(), source);
    }

    pub fn get(&self, category: &str) -> Option<&Source> {
        self.sources.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Build every configured category.
    ///
    /// `browser` is required as soon as one category scrapes.
    pub fn from_config(
        config: &Config,
        browser: Option<Arc<dyn BrowserBackend>>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        let mut api: Option<Arc<ApiAdapter>> = None;
        let mut scrape: Option<Arc<ScrapeAdapter>> = None;

        for (category, source) in &config.categories {
            let source = match source {
                SourceConfig::Api(endpoint) => {
                    let adapter = match &api {
                        Some(adapter) => adapter.clone(),
                        None => {
                            let client = build_client(&HttpClientConfig {
                                timeout: config.upstream.timeout(),
                                ..HttpClientConfig::default()
                            })
                            .map_err(|e| {
                                ConfigError::Invalid(format!("HTTP client: {}", e))
                            })?;
                            let adapter = Arc::new(ApiAdapter::new(
                                client,
                                &config.upstream.base_url,
                                &config.upstream.api_key,
                            ));
                            api = Some(adapter.clone());
                            adapter
                        }
                    };
                    Source::Api {
                        adapter,
                        endpoint: endpoint.clone(),
                    }
                }
                SourceConfig::Scrape(target) => {
                    let adapter = match &scrape {
                        Some(adapter) => adapter.clone(),
                        None => {
                            let backend = browser.clone().ok_or_else(|| {
                                ConfigError::Invalid(format!(
                                    "category {} scrapes but no browser is available",
                                    category
                                ))
                            })?;
                            let adapter = Arc::new(ScrapeAdapter::new(
                                backend,
                                config.browser.pool_size(),
                                config.browser.timeout(),
                            ));
                            scrape = Some(adapter.clone());
                            adapter
                        }
                    };
                    Source::Scrape {
                        adapter,
                        target: Arc::new(target.clone()),
                    }
                }
            };

            log::info!("Category {} served by {} source", category, source.kind());
            registry.insert(category.clone(), source);
        }

        Ok(registry)
    }
}
